//! Provider capability traits

use async_trait::async_trait;

use crate::callback::{AuthorizationRedirect, CallbackRequest};
use crate::error::Result;
use crate::identity::Identity;

/// A live, configured external identity provider.
///
/// Implementations must be safe to call concurrently for independent login
/// attempts and must not touch process-wide state beyond their own client.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Operator-chosen provider name (from the provider configuration)
    fn name(&self) -> &str;

    /// Provider type this instance was built from
    fn provider_type(&self) -> &str;

    /// Start a login attempt: issue a fresh callback state and build the
    /// upstream authorization URL carrying it.
    async fn authorization_redirect(&self, session_id: Option<&str>)
        -> Result<AuthorizationRedirect>;

    /// Handle the authorization callback and exchange it for an identity.
    ///
    /// The state is validated and consumed before any upstream call is made.
    async fn identity_exchange_callback(&self, request: &CallbackRequest) -> Result<Identity>;
}
