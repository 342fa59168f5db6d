//! Login flow
//!
//! One login attempt moves through these phases:
//!
//! ```text
//! Initiated -> AwaitingCallback -> Exchanging -> Succeeded
//!                                             \-> Failed
//! ```
//!
//! `begin` covers the first two phases (issuing the redirect), `complete`
//! covers the exchange. A failed attempt is terminal; the user starts over
//! with a new `begin`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use keyport_core::{AuthorizationRedirect, CallbackRequest, Identity, KeyportError, Result};

use crate::manager::ProviderManager;
use crate::settings::FlowSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    Initiated,
    AwaitingCallback,
    Exchanging,
    Succeeded,
    Failed,
}

impl fmt::Display for LoginPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::AwaitingCallback => write!(f, "awaiting_callback"),
            Self::Exchanging => write!(f, "exchanging"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Dispatches login attempts to providers resolved by name.
#[derive(Clone)]
pub struct LoginFlow {
    manager: Arc<ProviderManager>,
    exchange_timeout: Duration,
}

impl LoginFlow {
    pub fn new(manager: Arc<ProviderManager>, settings: &FlowSettings) -> Self {
        Self {
            manager,
            exchange_timeout: settings.exchange_timeout(),
        }
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    /// Start a login attempt with the named provider.
    #[instrument(skip(self, session_id))]
    pub async fn begin(
        &self,
        provider_name: &str,
        session_id: Option<&str>,
    ) -> Result<AuthorizationRedirect> {
        debug!(phase = %LoginPhase::Initiated, "Starting login attempt");
        let provider = self.manager.require(provider_name).await?;

        let redirect = provider.authorization_redirect(session_id).await?;
        info!(
            attempt = %redirect.attempt_id,
            phase = %LoginPhase::AwaitingCallback,
            "Issued authorization redirect"
        );
        Ok(redirect)
    }

    /// Finish a login attempt from its callback.
    ///
    /// The exchange is bounded by the configured timeout and by `cancel`;
    /// either firing yields `Cancelled`. The callback state is consumed
    /// atomically before any upstream call, so an interrupted exchange
    /// never leaves it half-used.
    #[instrument(skip(self, request, cancel))]
    pub async fn complete(
        &self,
        provider_name: &str,
        request: &CallbackRequest,
        cancel: &CancellationToken,
    ) -> Result<Identity> {
        let provider = self.manager.require(provider_name).await?;
        debug!(phase = %LoginPhase::Exchanging, "Exchanging callback");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(KeyportError::cancelled("login attempt cancelled by caller"))
            }
            result = tokio::time::timeout(
                self.exchange_timeout,
                provider.identity_exchange_callback(request),
            ) => {
                result.unwrap_or_else(|_| {
                    Err(KeyportError::cancelled(format!(
                        "exchange exceeded {}s timeout",
                        self.exchange_timeout.as_secs()
                    )))
                })
            }
        };

        match &outcome {
            Ok(identity) => info!(
                phase = %LoginPhase::Succeeded,
                external_id = %identity.external_id(),
                "Login succeeded"
            ),
            Err(e) if e.is_security_event() => warn!(
                phase = %LoginPhase::Failed,
                kind = e.kind(),
                error = %e,
                "Login rejected: callback state failed validation"
            ),
            Err(e) => warn!(
                phase = %LoginPhase::Failed,
                kind = e.kind(),
                error = %e,
                "Login failed"
            ),
        }

        outcome
    }
}
