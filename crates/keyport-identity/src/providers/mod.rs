//! Identity provider implementations

#[cfg(feature = "generic-oauth2")]
pub mod generic_oauth2;

#[cfg(feature = "oidc")]
pub mod oidc;

mod common;

pub use common::*;

use crate::registry::TypeRegistry;

/// Register every provider type compiled into this build.
#[cfg_attr(
    not(any(feature = "generic-oauth2", feature = "oidc")),
    allow(unused_variables)
)]
pub fn register_builtin(registry: &TypeRegistry) {
    #[cfg(feature = "generic-oauth2")]
    registry.register(std::sync::Arc::new(generic_oauth2::GenericOAuth2Factory));

    #[cfg(feature = "oidc")]
    registry.register(std::sync::Arc::new(oidc::OidcFactory));
}
