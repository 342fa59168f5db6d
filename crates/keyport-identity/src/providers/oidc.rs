//! Generic OIDC provider
//!
//! Works with any OIDC-compliant identity provider, using the discovery
//! document to resolve endpoints unless every endpoint is configured
//! explicitly. Subject attributes come from the user-info endpoint; when the
//! issuer has none, the verified ID token claims are used instead. An ID token
//! returned alongside user info is still verified (nonce included) and its
//! subject must match.

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

pub const PROVIDER_TYPE: &str = "oidc";

/// JWKS cache lifetime
const JWKS_TTL_SECS: i64 = 3600;

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

/// Options accepted by the `oidc` provider type
#[derive(Debug, Clone, Deserialize)]
pub struct OidcOptions {
    /// Issuer URL (used for discovery and ID token validation)
    pub issuer: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Authorization endpoint (overrides discovery)
    pub authorization_endpoint: Option<String>,
    /// Token endpoint (overrides discovery)
    pub token_endpoint: Option<String>,
    /// UserInfo endpoint (overrides discovery)
    pub userinfo_endpoint: Option<String>,
    /// JWKS URI (overrides discovery)
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub attribute_mapping: AttributeMapping,
}

/// Endpoints resolved at construction time
#[derive(Debug, Clone)]
struct OidcEndpoints {
    issuer: String,
    authorization: String,
    token: String,
    userinfo: Option<String>,
    jwks_uri: Option<String>,
}

/// Generic OIDC identity provider
pub struct OidcProvider {
    name: String,
    options: OidcOptions,
    endpoints: OidcEndpoints,
    http_client: HttpClient,
    jwks_cache: JwksCache,
    states: Arc<CallbackStateStore>,
}

impl OidcProvider {
    /// Create a provider, fetching the discovery document if needed.
    ///
    /// A failed discovery is a `Construction` error: a provider that cannot
    /// locate its endpoints is never put into service.
    pub async fn new(
        name: impl Into<String>,
        options: OidcOptions,
        context: &ProviderContext,
    ) -> Result<Self> {
        let name = name.into();
        if options.client_id.trim().is_empty() {
            return Err(KeyportError::construction(&name, "client_id is required"));
        }

        let http_client = HttpClient::new(context.http_timeout)?;
        let endpoints = Self::resolve_endpoints(&name, &options, &http_client).await?;
        debug!(provider = %name, "Resolved OIDC endpoints: {:?}", endpoints);

        Ok(Self {
            name,
            options,
            endpoints,
            http_client,
            jwks_cache: JwksCache::new(JWKS_TTL_SECS),
            states: context.state_store.clone(),
        })
    }

    async fn resolve_endpoints(
        name: &str,
        options: &OidcOptions,
        http_client: &HttpClient,
    ) -> Result<OidcEndpoints> {
        let fully_configured = options.authorization_endpoint.is_some()
            && options.token_endpoint.is_some()
            && (options.userinfo_endpoint.is_some() || options.jwks_uri.is_some());

        let discovery = if fully_configured {
            None
        } else {
            let discovery = OidcDiscovery::fetch(&options.issuer, http_client)
                .await
                .map_err(|e| KeyportError::construction(name, format!("discovery failed: {}", e)))?;
            Some(discovery)
        };

        let pick = |explicit: &Option<String>, discovered: Option<&String>| {
            explicit.clone().or_else(|| discovered.cloned())
        };

        let authorization = pick(
            &options.authorization_endpoint,
            discovery.as_ref().map(|d| &d.authorization_endpoint),
        )
        .ok_or_else(|| KeyportError::construction(name, "no authorization endpoint"))?;
        let token = pick(
            &options.token_endpoint,
            discovery.as_ref().map(|d| &d.token_endpoint),
        )
        .ok_or_else(|| KeyportError::construction(name, "no token endpoint"))?;
        let userinfo = pick(
            &options.userinfo_endpoint,
            discovery.as_ref().and_then(|d| d.userinfo_endpoint.as_ref()),
        );
        let jwks_uri = pick(
            &options.jwks_uri,
            discovery.as_ref().and_then(|d| d.jwks_uri.as_ref()),
        );

        if userinfo.is_none() && jwks_uri.is_none() {
            return Err(KeyportError::construction(
                name,
                "issuer exposes neither a userinfo endpoint nor a JWKS",
            ));
        }

        Ok(OidcEndpoints {
            issuer: discovery
                .map(|d| d.issuer)
                .unwrap_or_else(|| options.issuer.clone()),
            authorization,
            token,
            userinfo,
            jwks_uri,
        })
    }

    fn authorization_url(&self, state: &str, nonce: &str) -> String {
        let scopes = self.options.scopes.join(" ");
        append_query(
            &self.endpoints.authorization,
            &[
                ("client_id", self.options.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.options.redirect_url.as_str()),
                ("scope", scopes.as_str()),
                ("state", state),
                ("nonce", nonce),
            ],
        )
    }

    /// Claims from a verified ID token
    async fn id_token_claims(
        &self,
        id_token: &str,
        nonce: Option<&str>,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let jwks_uri = self
            .endpoints
            .jwks_uri
            .as_deref()
            .ok_or_else(|| KeyportError::upstream("no JWKS available to verify ID token"))?;
        let jwks = self.jwks_cache.get_or_fetch(jwks_uri, &self.http_client).await?;

        verify_id_token(
            id_token,
            &jwks,
            &IdTokenExpectations {
                issuer: &self.endpoints.issuer,
                audience: &self.options.client_id,
                nonce,
            },
        )
    }
}

#[async_trait]
impl OAuthProvider for OidcProvider {
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
        let state = self.states.issue(&self.name, session_id, true)?;
        let url = self.authorization_url(&state.value, state.nonce.as_deref().unwrap_or_default());

        Ok(AuthorizationRedirect {
            url,
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
                token_url: &self.endpoints.token,
                client_id: &self.options.client_id,
                client_secret: &self.options.client_secret,
                redirect_uri: &self.options.redirect_url,
                code: &callback.code,
            },
        )
        .await?;

        // Any ID token is verified when the issuer publishes keys, so the
        // nonce is checked on the user-info path too.
        let id_claims = match (&token.id_token, &self.endpoints.jwks_uri) {
            (Some(id_token), Some(_)) => Some(
                self.id_token_claims(id_token, callback.state.nonce.as_deref())
                    .await?,
            ),
            _ => None,
        };

        let attributes = match (&self.endpoints.userinfo, id_claims) {
            (Some(userinfo), claims) => {
                let info =
                    fetch_user_info(&self.http_client, userinfo, token.access_token()?).await?;
                if let Some(claims) = claims {
                    ensure_same_subject(&claims, &info)?;
                }
                info
            }
            (None, Some(claims)) => claims,
            (None, None) => {
                return Err(KeyportError::upstream(
                    "token response has no ID token and no userinfo endpoint is available",
                ))
            }
        };

        Identity::normalize(&self.name, attributes, &self.options.attribute_mapping)
    }
}

/// User info must describe the subject the ID token was issued for.
fn ensure_same_subject(
    claims: &serde_json::Map<String, serde_json::Value>,
    user_info: &serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    match (claims.get("sub"), user_info.get("sub")) {
        (Some(expected), Some(actual)) if expected != actual => Err(KeyportError::upstream(
            "user info subject does not match ID token subject",
        )),
        _ => Ok(()),
    }
}

/// Factory for [`OidcProvider`]
pub struct OidcFactory;

#[async_trait]
impl ProviderFactory for OidcFactory {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    async fn create(
        &self,
        name: &str,
        options: &DynamicOptions,
        context: &ProviderContext,
    ) -> Result<Arc<dyn OAuthProvider>> {
        let options: OidcOptions = options.decode(name)?;
        Ok(Arc::new(OidcProvider::new(name, options, context).await?))
    }
}
