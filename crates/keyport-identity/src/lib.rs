//! Keyport Identity - pluggable external identity providers
//!
//! This crate turns declarative provider configuration into live providers
//! and drives the login exchange against them:
//! - Generic OAuth2 (`generic-oauth2`)
//! - Generic OIDC (`oidc`)
//!
//! # Architecture
//!
//! - `TypeRegistry`: maps a provider type to the `ProviderFactory` that builds it
//! - `ProviderManager`: one live provider per configured name, rebuilt when
//!   its configuration changes
//! - `LoginFlow`: issues authorization redirects and exchanges callbacks for
//!   a normalized `Identity`
//! - `CallbackStateStore`: single-use, expiring anti-CSRF state values
//!
//! New provider types implement `OAuthProvider` and `ProviderFactory` and
//! register themselves before the manager is first configured.

pub mod flow;
pub mod manager;
pub mod providers;
pub mod registry;
pub mod settings;
pub mod source;
pub mod state;


// Re-export provider implementations
#[cfg(feature = "generic-oauth2")]
pub use providers::generic_oauth2::{GenericOAuth2Factory, GenericOAuth2Provider};

#[cfg(feature = "oidc")]
pub use providers::oidc::{OidcFactory, OidcProvider};

// Re-export core types
pub use keyport_core::*;

pub use flow::{LoginFlow, LoginPhase};
pub use manager::{ConfigureReport, ProviderConfigError, ProviderManager};
pub use registry::{ProviderContext, ProviderFactory, TypeRegistry};
pub use settings::Settings;
pub use source::{ConfigSource, FileConfigSource, StaticConfigSource};
pub use state::{CallbackState, CallbackStateStore};
