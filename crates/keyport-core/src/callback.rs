//! Authorization redirects and inbound callback requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeyportError, Result};
use crate::ids::LoginAttemptId;

/// Where to send the browser to start a login, plus the state it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRedirect {
    /// Upstream authorization URL with the state embedded
    pub url: String,
    /// State value the callback must echo back
    pub state: String,
    pub attempt_id: LoginAttemptId,
    /// After this instant the callback will be rejected
    pub expires_at: DateTime<Utc>,
}

/// The parts of an inbound authorization callback the exchange needs.
///
/// The routing layer builds one from the callback's query string and, when it
/// has one, binds the caller's session so the state can be checked against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackRequest {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    session_id: Option<String>,
}

impl CallbackRequest {
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Parse a raw (url-encoded) query string such as `code=abc&state=s1`.
    pub fn from_query(query: &str) -> Self {
        let mut request = Self::default();
        let query = query.strip_prefix('?').unwrap_or(query);

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => request.code = value,
                "state" => request.state = value,
                "error" => request.error = value,
                "error_description" => request.error_description = value,
                _ => {}
            }
        }

        request
    }

    /// Parse the query part of a request URI (absolute or path-only).
    pub fn from_uri(uri: &str) -> Self {
        match uri.split_once('?') {
            Some((_, query)) => Self::from_query(query.split('#').next().unwrap_or_default()),
            None => Self::default(),
        }
    }

    /// Bind the session presenting this callback.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Upstream-reported error (`error` / `error_description` parameters).
    pub fn upstream_error(&self) -> Option<String> {
        let error = self.error.as_deref().filter(|e| !e.is_empty())?;
        Some(match self.error_description.as_deref() {
            Some(desc) if !desc.is_empty() => format!("{}: {}", error, desc),
            _ => error.to_string(),
        })
    }

    /// State value, or `MalformedCallback` when it is missing.
    pub fn require_state(&self) -> Result<&str> {
        non_empty(self.state.as_deref())
            .ok_or_else(|| KeyportError::malformed_callback("missing 'state' parameter"))
    }

    /// Authorization code, or `MalformedCallback` when it is missing.
    ///
    /// An upstream `error` parameter takes precedence and is reported as an
    /// `UpstreamExchange` failure.
    pub fn require_code(&self) -> Result<&str> {
        if let Some(error) = self.upstream_error() {
            return Err(KeyportError::upstream(format!(
                "provider returned error: {}",
                error
            )));
        }
        non_empty(self.code.as_deref())
            .ok_or_else(|| KeyportError::malformed_callback("missing 'code' parameter"))
    }

    /// `(code, state)` when both are present.
    pub fn require_code_and_state(&self) -> Result<(&str, &str)> {
        let state = self.require_state()?;
        Ok((self.require_code()?, state))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
