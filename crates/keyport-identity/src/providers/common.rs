//! Common utilities and types for provider implementations

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use keyport_core::{KeyportError, Result};

/// Longest upstream error body echoed into an error message
const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// HTTP Client
// =============================================================================

/// HTTP client for upstream calls.
///
/// Requests are never retried: a failed exchange is terminal and the user
/// starts a fresh login attempt.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyportError::internal_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send a request; transport failures and non-2xx statuses become
    /// `UpstreamExchange` errors naming `what` was being called.
    pub async fn execute(&self, request_builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = request_builder
            .send()
            .await
            .map_err(|e| KeyportError::upstream(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(KeyportError::upstream(format!(
            "{} returned HTTP {} - {}",
            what, status, body
        )))
    }

    /// Send a request and decode a JSON body
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = self.execute(request_builder, what).await?;
        response
            .json()
            .await
            .map_err(|e| KeyportError::upstream(format!("Failed to parse {} response: {}", what, e)))
    }
}

// =============================================================================
// Token Exchange
// =============================================================================

/// Token endpoint response.
///
/// Some providers answer `200 OK` with an `error` body instead of a token,
/// so every field is optional and checked by [`TokenResponse::access_token`].
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl TokenResponse {
    pub fn access_token(&self) -> Result<&str> {
        if let Some(error) = &self.error {
            return Err(KeyportError::upstream(format!(
                "token endpoint returned error: {}{}",
                error,
                self.error_description
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            )));
        }

        self.access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| KeyportError::upstream("token response has no access_token"))
    }
}

/// Parameters for redeeming an authorization code
pub struct CodeExchange<'a> {
    pub token_url: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub redirect_uri: &'a str,
    pub code: &'a str,
}

/// Redeem an authorization code at the token endpoint
pub async fn exchange_code(client: &HttpClient, exchange: CodeExchange<'_>) -> Result<TokenResponse> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", exchange.code),
        ("redirect_uri", exchange.redirect_uri),
        ("client_id", exchange.client_id),
        ("client_secret", exchange.client_secret),
    ];

    let token: TokenResponse = client
        .fetch_json(
            client
                .inner()
                .post(exchange.token_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(&params),
            "token endpoint",
        )
        .await?;

    token.access_token()?;
    Ok(token)
}

/// Fetch subject attributes from a user-info endpoint
pub async fn fetch_user_info(
    client: &HttpClient,
    user_info_url: &str,
    access_token: &str,
) -> Result<Map<String, Value>> {
    let body: Value = client
        .fetch_json(
            client
                .inner()
                .get(user_info_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .bearer_auth(access_token),
            "user info endpoint",
        )
        .await?;

    match body {
        Value::Object(attributes) => Ok(attributes),
        _ => Err(KeyportError::upstream(
            "user info endpoint did not return a JSON object",
        )),
    }
}

/// Append query parameters to a URL that may already carry a query string
pub fn append_query(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    let mut separator = if base.contains('?') { '&' } else { '?' };

    for (key, value) in params {
        url.push(separator);
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
        separator = '&';
    }
    url
}

// =============================================================================
// OIDC Discovery
// =============================================================================

/// OIDC Discovery document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

impl OidcDiscovery {
    /// Fetch discovery document from well-known endpoint
    pub async fn fetch(issuer: &str, client: &HttpClient) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );

        debug!("Fetching OIDC discovery from {}", url);
        client.fetch_json(client.inner().get(&url), "OIDC discovery").await
    }
}

// =============================================================================
// JWKS
// =============================================================================

/// JSON Web Key Set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl JwkSet {
    /// Find a key by kid; a set with a single key matches a token without kid
    pub fn find_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }

    /// Decoding key for `kid`, checked against the token's algorithm family
    pub fn decoding_key(&self, kid: Option<&str>, alg: Algorithm) -> Result<DecodingKey> {
        let jwk = self.find_key(kid).ok_or_else(|| {
            KeyportError::upstream(format!("ID token key {:?} not found in JWKS", kid))
        })?;

        match (jwk.kty.as_str(), alg) {
            (
                "RSA",
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => {
                let (n, e) = jwk.n.as_ref().zip(jwk.e.as_ref()).ok_or_else(|| {
                    KeyportError::upstream("RSA key missing 'n' or 'e' parameter")
                })?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| KeyportError::upstream(format!("Invalid RSA key: {}", e)))
            }
            ("EC", Algorithm::ES256 | Algorithm::ES384) => {
                let (x, y) = jwk.x.as_ref().zip(jwk.y.as_ref()).ok_or_else(|| {
                    KeyportError::upstream("EC key missing 'x' or 'y' parameter")
                })?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| KeyportError::upstream(format!("Invalid EC key: {}", e)))
            }
            (kty, alg) => Err(KeyportError::upstream(format!(
                "ID token algorithm {:?} does not match key type {}",
                alg, kty
            ))),
        }
    }
}

/// Cache for one provider's JWKS
pub struct JwksCache {
    cached: RwLock<Option<(JwkSet, DateTime<Utc>)>>,
    ttl_secs: i64,
}

impl JwksCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            cached: RwLock::new(None),
            ttl_secs,
        }
    }

    pub async fn get_or_fetch(&self, jwks_uri: &str, client: &HttpClient) -> Result<JwkSet> {
        if let Some((keys, fetched_at)) = self.cached.read().await.as_ref() {
            if (Utc::now() - *fetched_at).num_seconds() < self.ttl_secs {
                return Ok(keys.clone());
            }
        }

        debug!("Fetching JWKS from {}", jwks_uri);
        let keys: JwkSet = client.fetch_json(client.inner().get(jwks_uri), "JWKS").await?;
        *self.cached.write().await = Some((keys.clone(), Utc::now()));
        Ok(keys)
    }
}

/// Expected values when verifying an ID token
pub struct IdTokenExpectations<'a> {
    pub issuer: &'a str,
    pub audience: &'a str,
    pub nonce: Option<&'a str>,
}

/// Verify an ID token's signature and standard claims, returning its claims
pub fn verify_id_token(
    token: &str,
    jwks: &JwkSet,
    expected: &IdTokenExpectations<'_>,
) -> Result<Map<String, Value>> {
    let header = decode_header(token)
        .map_err(|e| KeyportError::upstream(format!("Failed to decode ID token header: {}", e)))?;
    let key = jwks.decoding_key(header.kid.as_deref(), header.alg)?;

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[expected.issuer]);
    validation.set_audience(&[expected.audience]);
    validation.leeway = 60;

    let claims = decode::<Map<String, Value>>(token, &key, &validation)
        .map_err(|e| KeyportError::upstream(format!("ID token validation failed: {}", e)))?
        .claims;

    if let Some(nonce) = expected.nonce {
        if claims.get("nonce").and_then(Value::as_str) != Some(nonce) {
            return Err(KeyportError::upstream("ID token nonce mismatch"));
        }
    }

    Ok(claims)
}
