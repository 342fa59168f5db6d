//! Error types for Keyport
//!
//! Every failure the identity subsystem can produce is classified into one of
//! the variants below. Configuration errors are isolated per provider entry;
//! exchange errors are terminal for a single login attempt.

use std::fmt;
use thiserror::Error;

/// Why a callback `state` value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRejection {
    /// Never issued, already consumed, or already purged.
    Unknown,
    /// Issued for a different provider than the one handling the callback.
    ProviderMismatch,
    /// Bound to a different session than the one presenting it.
    SessionMismatch,
    /// Presented after its expiry.
    Expired,
}

impl fmt::Display for StateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown or already consumed state"),
            Self::ProviderMismatch => write!(f, "state issued for another provider"),
            Self::SessionMismatch => write!(f, "state bound to another session"),
            Self::Expired => write!(f, "state expired"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum KeyportError {
    #[error("Unknown provider type: {provider_type}")]
    UnknownProviderType { provider_type: String },

    #[error("Failed to construct provider '{provider}': {message}")]
    Construction { provider: String, message: String },

    #[error("Malformed callback: {message}")]
    MalformedCallback { message: String },

    #[error("State validation failed: {reason}")]
    StateValidation { reason: StateRejection },

    #[error("Upstream exchange failed: {message}")]
    UpstreamExchange { message: String },

    #[error("Exchange cancelled: {message}")]
    Cancelled { message: String },

    #[error("Provider not found: {name}")]
    ProviderNotFound { name: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KeyportError {
    pub fn unknown_provider_type(provider_type: impl Into<String>) -> Self {
        Self::UnknownProviderType {
            provider_type: provider_type.into(),
        }
    }

    pub fn construction(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Construction {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed_callback(message: impl Into<String>) -> Self {
        Self::MalformedCallback {
            message: message.into(),
        }
    }

    pub fn state_validation(reason: StateRejection) -> Self {
        Self::StateValidation { reason }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamExchange {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn provider_not_found(name: impl Into<String>) -> Self {
        Self::ProviderNotFound { name: name.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownProviderType { .. } => "unknown_provider_type",
            Self::Construction { .. } => "construction",
            Self::MalformedCallback { .. } => "malformed_callback",
            Self::StateValidation { .. } => "state_validation",
            Self::UpstreamExchange { .. } => "upstream_exchange",
            Self::Cancelled { .. } => "cancelled",
            Self::ProviderNotFound { .. } => "provider_not_found",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }

    /// Suggested HTTP status for the routing layer answering a callback.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedCallback { .. } => 400,
            Self::StateValidation { .. } => 401,
            Self::ProviderNotFound { .. } => 404,
            Self::UpstreamExchange { .. } => 502,
            Self::Cancelled { .. } => 504,
            Self::UnknownProviderType { .. }
            | Self::Construction { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Text that may be shown to an end user. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MalformedCallback { .. } => "Invalid login request",
            Self::ProviderNotFound { .. } => "Unknown login provider",
            _ => "Login failed, please try again",
        }
    }

    /// Whether this failure should be treated as a security event.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::StateValidation { .. })
    }
}

pub type Result<T> = std::result::Result<T, KeyportError>;
