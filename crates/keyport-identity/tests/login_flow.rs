//! End-to-end login against a mocked OAuth2 upstream
//!
//! Runs the public surface the way an embedding server would: register the
//! built-in provider types, configure a provider, issue a redirect and
//! complete the callback.

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keyport_identity::{
    providers, CallbackRequest, DynamicOptions, KeyportError, LoginFlow, ProviderConfig,
    ProviderContext, ProviderManager, Settings, StateRejection, TypeRegistry,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn acme_config(base: &str, scopes: &[&str]) -> ProviderConfig {
    let options = DynamicOptions::from_value(json!({
        "client_id": "acme-client",
        "client_secret": "acme-secret",
        "authorize_url": format!("{}/oauth/authorize", base),
        "token_url": format!("{}/oauth/token", base),
        "user_info_url": format!("{}/api/user", base),
        "redirect_url": "https://keyport.test/oauth/callback/acme",
        "scopes": scopes,
    }))
    .unwrap();

    ProviderConfig::new("acme", "generic-oauth2", options)
}

async fn acme_upstream() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "acme-token",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/user"))
        .and(header("authorization", "Bearer acme-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "u-123",
            "preferred_username": "alice",
            "email": "alice@example.com"
        })))
        .mount(&server)
        .await;

    server
}

async fn login_flow(configs: &[ProviderConfig]) -> LoginFlow {
    let settings = Settings::default();

    let registry = Arc::new(TypeRegistry::new());
    providers::register_builtin(&registry);

    let manager = Arc::new(ProviderManager::new(
        registry,
        ProviderContext::from_settings(&settings).expect("default settings are valid"),
    ));
    manager
        .configure(configs)
        .await
        .into_result()
        .expect("providers should configure");

    LoginFlow::new(manager, &settings.flow)
}

#[tokio::test]
async fn test_acme_login_and_replay() {
    init_tracing();
    let server = acme_upstream().await;
    let flow = login_flow(&[acme_config(&server.uri(), &["profile"])]).await;

    let redirect = flow.begin("acme", None).await.unwrap();
    assert!(redirect
        .url
        .starts_with(&format!("{}/oauth/authorize?", server.uri())));

    let callback = CallbackRequest::from_uri(&format!(
        "/oauth/callback/acme?code=abc&state={}",
        redirect.state
    ));
    let identity = flow
        .complete("acme", &callback, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(identity.provider_name(), "acme");
    assert_eq!(identity.external_id(), "u-123");
    assert_eq!(identity.username(), "alice");
    assert_eq!(identity.email(), "alice@example.com");

    let upstream_calls = server.received_requests().await.unwrap().len();

    let replay = flow
        .complete("acme", &callback, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        replay,
        KeyportError::StateValidation {
            reason: StateRejection::Unknown
        }
    ));
    assert_eq!(replay.status_code(), 401);
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        upstream_calls
    );
}

#[tokio::test]
async fn test_state_survives_provider_rebuild() {
    init_tracing();
    let server = acme_upstream().await;
    let flow = login_flow(&[acme_config(&server.uri(), &["profile"])]).await;

    let redirect = flow.begin("acme", None).await.unwrap();

    let report = flow
        .manager()
        .configure(&[acme_config(&server.uri(), &["profile", "email"])])
        .await;
    assert_eq!(report.constructed, vec!["acme"]);

    let callback = CallbackRequest::new("abc", redirect.state);
    let identity = flow
        .complete("acme", &callback, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(identity.external_id(), "u-123");
}

#[tokio::test]
async fn test_state_is_bound_to_provider() {
    init_tracing();
    let server = acme_upstream().await;

    let mut other = acme_config(&server.uri(), &[]);
    other.name = "other".to_string();
    let flow = login_flow(&[acme_config(&server.uri(), &[]), other]).await;

    let redirect = flow.begin("acme", None).await.unwrap();
    let err = flow
        .complete(
            "other",
            &CallbackRequest::new("abc", redirect.state),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KeyportError::StateValidation {
            reason: StateRejection::ProviderMismatch
        }
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_denial() {
    init_tracing();
    let server = acme_upstream().await;
    let flow = login_flow(&[acme_config(&server.uri(), &[])]).await;

    let redirect = flow.begin("acme", Some("sess-9")).await.unwrap();
    let callback = CallbackRequest::from_query(&format!(
        "error=access_denied&state={}",
        redirect.state
    ))
    .with_session("sess-9");

    let err = flow
        .complete("acme", &callback, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, KeyportError::UpstreamExchange { .. }));
    assert_eq!(err.status_code(), 502);
    assert!(server.received_requests().await.unwrap().is_empty());
}
