//! Generic OAuth2 provider
//!
//! Works with any provider that implements the authorization-code grant and
//! exposes a JSON user-info endpoint. All endpoints come from configuration.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use keyport_core::{
    AttributeMapping, AuthorizationRedirect, CallbackRequest, DynamicOptions, Identity,
    KeyportError, OAuthProvider, Result,
};

use super::common::*;
use crate::registry::{ProviderContext, ProviderFactory};
use crate::state::CallbackStateStore;

pub const PROVIDER_TYPE: &str = "generic-oauth2";

/// Options accepted by the `generic-oauth2` provider type
#[derive(Debug, Clone, Deserialize)]
pub struct GenericOAuth2Options {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Upstream authorization endpoint the browser is redirected to
    pub authorize_url: String,
    pub token_url: String,
    pub user_info_url: String,
    /// Callback URL registered with the upstream
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub attribute_mapping: AttributeMapping,
}

impl GenericOAuth2Options {
    fn validate(&self, provider: &str) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(KeyportError::construction(provider, "client_id is required"));
        }

        for (field, value) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
            ("user_info_url", &self.user_info_url),
            ("redirect_url", &self.redirect_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                KeyportError::construction(provider, format!("invalid {}: {}", field, e))
            })?;
        }
        Ok(())
    }
}

/// Generic OAuth2 identity provider
pub struct GenericOAuth2Provider {
    name: String,
    options: GenericOAuth2Options,
    http_client: HttpClient,
    states: Arc<CallbackStateStore>,
}

impl GenericOAuth2Provider {
    pub fn new(
        name: impl Into<String>,
        options: GenericOAuth2Options,
        context: &ProviderContext,
    ) -> Result<Self> {
        let name = name.into();
        options.validate(&name)?;

        Ok(Self {
            name,
            options,
            http_client: HttpClient::new(context.http_timeout)?,
            states: context.state_store.clone(),
        })
    }

    fn authorization_url(&self, state: &str) -> String {
        let scopes = self.options.scopes.join(" ");
        let mut params = vec![
            ("client_id", self.options.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.options.redirect_url.as_str()),
            ("state", state),
        ];
        if !scopes.is_empty() {
            params.push(("scope", scopes.as_str()));
        }

        append_query(&self.options.authorize_url, &params)
    }
}

#[async_trait]
impl OAuthProvider for GenericOAuth2Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    async fn authorization_redirect(
        &self,
        session_id: Option<&str>,
    ) -> Result<AuthorizationRedirect> {
        let state = self.states.issue(&self.name, session_id, false)?;

        Ok(AuthorizationRedirect {
            url: self.authorization_url(&state.value),
            state: state.value,
            attempt_id: state.attempt_id,
            expires_at: state.expires_at,
        })
    }

    #[instrument(skip(self, request), fields(provider = %self.name))]
    async fn identity_exchange_callback(&self, request: &CallbackRequest) -> Result<Identity> {
        let callback = self.states.validate_callback(&self.name, request)?;
        debug!(attempt = %callback.state.attempt_id, "Callback state accepted");

        let token = exchange_code(
            &self.http_client,
            CodeExchange {
                token_url: &self.options.token_url,
                client_id: &self.options.client_id,
                client_secret: &self.options.client_secret,
                redirect_uri: &self.options.redirect_url,
                code: &callback.code,
            },
        )
        .await?;

        let attributes = fetch_user_info(
            &self.http_client,
            &self.options.user_info_url,
            token.access_token()?,
        )
        .await?;

        Identity::normalize(&self.name, attributes, &self.options.attribute_mapping)
    }
}

/// Factory for [`GenericOAuth2Provider`]
pub struct GenericOAuth2Factory;

#[async_trait]
impl ProviderFactory for GenericOAuth2Factory {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    async fn create(
        &self,
        name: &str,
        options: &DynamicOptions,
        context: &ProviderContext,
    ) -> Result<Arc<dyn OAuthProvider>> {
        let options: GenericOAuth2Options = options.decode(name)?;
        Ok(Arc::new(GenericOAuth2Provider::new(name, options, context)?))
    }
}
