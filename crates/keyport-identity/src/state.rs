//! Callback state store
//!
//! Each login attempt gets a random, single-use state value that the upstream
//! echoes back on the callback. Validation and invalidation happen in one
//! atomic removal, so two concurrent callbacks carrying the same state can
//! never both pass.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use keyport_core::{CallbackRequest, KeyportError, LoginAttemptId, Result, StateRejection};

/// Length in bytes of generated state and nonce values (hex-encoded on the wire)
const TOKEN_BYTES: usize = 32;

/// Longest accepted state lifetime (one day)
pub const MAX_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Shortest janitor sweep interval
const MIN_JANITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Generate a cryptographically random, hex-encoded token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A state issued for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackState {
    pub value: String,
    /// Provider the redirect was issued for
    pub provider_name: String,
    /// Session the attempt is bound to, if the caller supplied one
    pub session_id: Option<String>,
    pub attempt_id: LoginAttemptId,
    /// OIDC nonce sent alongside the state, if the provider uses one
    pub nonce: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CallbackState {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A callback whose state has been validated and consumed.
#[derive(Debug, Clone)]
pub struct ValidatedCallback {
    pub state: CallbackState,
    /// Authorization code to redeem at the token endpoint
    pub code: String,
}

/// Shared store of outstanding callback states.
///
/// Shared by all provider instances so that in-flight logins survive a
/// provider being rebuilt after a configuration change.
pub struct CallbackStateStore {
    states: DashMap<String, CallbackState>,
    ttl: chrono::Duration,
}

impl CallbackStateStore {
    /// Create a store whose states live for `ttl`.
    ///
    /// A lifetime above [`MAX_STATE_TTL`] is a `Configuration` error.
    pub fn new(ttl: Duration) -> Result<Self> {
        if ttl > MAX_STATE_TTL {
            return Err(KeyportError::configuration(format!(
                "state TTL of {}s exceeds the maximum of {}s",
                ttl.as_secs(),
                MAX_STATE_TTL.as_secs()
            )));
        }

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| KeyportError::configuration(format!("invalid state TTL: {}", e)))?;
        Ok(Self {
            states: DashMap::new(),
            ttl,
        })
    }

    /// Issue a fresh state for `provider_name`, optionally bound to a session
    /// and optionally carrying an OIDC nonce.
    pub fn issue(
        &self,
        provider_name: &str,
        session_id: Option<&str>,
        with_nonce: bool,
    ) -> Result<CallbackState> {
        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| KeyportError::internal_error("state expiry out of range"))?;
        let state = CallbackState {
            value: generate_token(),
            provider_name: provider_name.to_string(),
            session_id: session_id.map(str::to_string),
            attempt_id: LoginAttemptId::new(),
            nonce: with_nonce.then(generate_token),
            issued_at,
            expires_at,
        };

        self.states.insert(state.value.clone(), state.clone());
        debug!(
            provider = %provider_name,
            attempt = %state.attempt_id,
            "Issued callback state"
        );
        Ok(state)
    }

    /// Validate and consume a state in one step.
    ///
    /// The entry is removed before any check runs, so a rejected state is
    /// burned as well and a second presentation always fails as unknown.
    pub fn consume(
        &self,
        value: &str,
        provider_name: &str,
        session_id: Option<&str>,
    ) -> Result<CallbackState> {
        let (_, state) = self
            .states
            .remove(value)
            .ok_or_else(|| KeyportError::state_validation(StateRejection::Unknown))?;

        if state.provider_name != provider_name {
            return Err(KeyportError::state_validation(
                StateRejection::ProviderMismatch,
            ));
        }

        if let Some(bound) = state.session_id.as_deref() {
            if session_id != Some(bound) {
                return Err(KeyportError::state_validation(
                    StateRejection::SessionMismatch,
                ));
            }
        }

        if state.is_expired_at(Utc::now()) {
            return Err(KeyportError::state_validation(StateRejection::Expired));
        }

        Ok(state)
    }

    /// Check a callback's parameters and consume its state.
    ///
    /// Missing parameters are rejected without touching the store. An
    /// upstream `error` response still burns the state before it is reported.
    pub fn validate_callback(
        &self,
        provider_name: &str,
        request: &CallbackRequest,
    ) -> Result<ValidatedCallback> {
        let value = request.require_state()?;
        if request.upstream_error().is_none() {
            request.require_code()?;
        }

        let state = self
            .consume(value, provider_name, request.session_id())
            .inspect_err(|e| {
                warn!(provider = %provider_name, error = %e, "Rejected callback state");
            })?;

        let code = request.require_code()?.to_string();
        Ok(ValidatedCallback { state, code })
    }

    /// Drop expired states, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.states.len();
        self.states.retain(|_, state| !state.is_expired_at(now));
        before.saturating_sub(self.states.len())
    }

    /// Number of outstanding states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Periodically purge expired states until the store is dropped.
    ///
    /// Intervals shorter than 10ms are raised to 10ms.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(MIN_JANITOR_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired callback states", purged);
                }
            }
        })
    }
}
