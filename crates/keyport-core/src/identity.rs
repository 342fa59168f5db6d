//! Normalized identities and upstream attribute mapping
//!
//! Upstream providers describe the same user with different attribute names
//! (`sub` vs `id` vs `uid`, `preferred_username` vs `login`, ...). This module
//! folds them into one fixed [`Identity`] shape. Attributes that are not
//! consumed by a mapping are carried verbatim in [`Identity::extra`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{KeyportError, Result};

// =============================================================================
// Attribute Mapping
// =============================================================================

/// Ordered candidate attribute names for each normalized field.
///
/// The first candidate present with a non-empty value wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeMapping {
    /// Candidates for the stable external identifier
    pub id: Vec<String>,
    /// Candidates for the display/login name
    pub username: Vec<String>,
    /// Candidates for the email address
    pub email: Vec<String>,
}

impl Default for AttributeMapping {
    fn default() -> Self {
        Self {
            id: vec!["sub".to_string(), "id".to_string(), "uid".to_string()],
            username: vec![
                "preferred_username".to_string(),
                "login".to_string(),
                "name".to_string(),
            ],
            email: vec!["email".to_string(), "mail".to_string()],
        }
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Normalized result of a successful identity exchange.
///
/// Only produced by [`Identity::normalize`]; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    provider_name: String,
    external_id: String,
    username: String,
    email: String,
    extra: Map<String, Value>,
}

impl Identity {
    /// Fold raw upstream attributes into an identity.
    ///
    /// Fails with `UpstreamExchange` when no identifier attribute is present,
    /// since an identity without a stable id cannot be linked to an account.
    pub fn normalize(
        provider_name: impl Into<String>,
        attributes: Map<String, Value>,
        mapping: &AttributeMapping,
    ) -> Result<Self> {
        let mut extra = attributes;

        let external_id = take_first(&mut extra, &mapping.id).ok_or_else(|| {
            KeyportError::upstream(format!(
                "user info has no identifier attribute (tried: {})",
                mapping.id.join(", ")
            ))
        })?;
        let username = take_first(&mut extra, &mapping.username);
        let email = take_first(&mut extra, &mapping.email).unwrap_or_default();

        let username = username
            .or_else(|| {
                email
                    .split_once('@')
                    .map(|(local, _)| local.to_string())
                    .filter(|local| !local.is_empty())
            })
            .unwrap_or_else(|| external_id.clone());

        Ok(Self {
            provider_name: provider_name.into(),
            external_id,
            username,
            email,
            extra,
        })
    }

    /// Name of the configured provider that produced this identity
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Stable upstream identifier
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Email address, empty when the upstream did not supply one
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Upstream attributes not consumed by the mapping
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Remove and return the first candidate attribute with a usable value.
fn take_first(attributes: &mut Map<String, Value>, candidates: &[String]) -> Option<String> {
    let key = candidates
        .iter()
        .find(|key| attributes.get(key.as_str()).and_then(scalar_to_string).is_some())?;
    attributes.remove(key.as_str()).as_ref().and_then(scalar_to_string)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
