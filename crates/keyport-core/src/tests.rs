//! Unit tests for keyport-core

use super::*;
use serde_json::{json, Map, Value};

fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("test attributes must be an object"),
    }
}

// =============================================================================
// Identity Normalization Tests
// =============================================================================

#[cfg(test)]
mod identity_tests {
    use super::*;

    #[test]
    fn test_normalize_oidc_style_attributes() {
        let identity = Identity::normalize(
            "acme",
            attrs(json!({
                "sub": "u-123",
                "preferred_username": "alice",
                "email": "alice@example.com",
                "locale": "en-US"
            })),
            &AttributeMapping::default(),
        )
        .unwrap();

        assert_eq!(identity.provider_name(), "acme");
        assert_eq!(identity.external_id(), "u-123");
        assert_eq!(identity.username(), "alice");
        assert_eq!(identity.email(), "alice@example.com");
        assert_eq!(identity.extra().get("locale"), Some(&json!("en-US")));
        assert!(identity.extra().get("sub").is_none());
    }

    #[test]
    fn test_normalize_github_style_attributes() {
        let identity = Identity::normalize(
            "github",
            attrs(json!({
                "id": 583231,
                "login": "octocat",
                "name": "The Octocat",
                "mail": "octocat@github.com"
            })),
            &AttributeMapping::default(),
        )
        .unwrap();

        assert_eq!(identity.external_id(), "583231");
        assert_eq!(identity.username(), "octocat");
        assert_eq!(identity.email(), "octocat@github.com");
        // "name" lost to "login" and stays available downstream
        assert_eq!(identity.extra().get("name"), Some(&json!("The Octocat")));
    }

    #[test]
    fn test_normalize_skips_empty_candidates() {
        let identity = Identity::normalize(
            "ldap",
            attrs(json!({ "sub": "  ", "uid": "jdoe", "email": "jdoe@corp.example" })),
            &AttributeMapping::default(),
        )
        .unwrap();

        assert_eq!(identity.external_id(), "jdoe");
        // the blank "sub" was not consumed
        assert_eq!(identity.extra().get("sub"), Some(&json!("  ")));
    }

    #[test]
    fn test_normalize_username_fallbacks() {
        let from_email = Identity::normalize(
            "p",
            attrs(json!({ "sub": "1", "email": "bob@example.com" })),
            &AttributeMapping::default(),
        )
        .unwrap();
        assert_eq!(from_email.username(), "bob");

        let from_id = Identity::normalize(
            "p",
            attrs(json!({ "sub": "42" })),
            &AttributeMapping::default(),
        )
        .unwrap();
        assert_eq!(from_id.username(), "42");
        assert_eq!(from_id.email(), "");
    }

    #[test]
    fn test_normalize_requires_identifier() {
        let err = Identity::normalize(
            "p",
            attrs(json!({ "email": "nobody@example.com" })),
            &AttributeMapping::default(),
        )
        .unwrap_err();

        assert!(matches!(err, KeyportError::UpstreamExchange { .. }));
    }

    #[test]
    fn test_normalize_custom_mapping() {
        let mapping = AttributeMapping {
            id: vec!["objectGUID".to_string()],
            username: vec!["sAMAccountName".to_string()],
            email: vec!["userPrincipalName".to_string()],
        };

        let identity = Identity::normalize(
            "corp",
            attrs(json!({
                "objectGUID": "a1b2",
                "sAMAccountName": "jdoe",
                "userPrincipalName": "jdoe@corp.example",
                "sub": "ignored"
            })),
            &mapping,
        )
        .unwrap();

        assert_eq!(identity.external_id(), "a1b2");
        assert_eq!(identity.username(), "jdoe");
        assert_eq!(identity.extra().get("sub"), Some(&json!("ignored")));
    }

    #[test]
    fn test_attribute_mapping_partial_deserialization() {
        let mapping: AttributeMapping =
            serde_json::from_value(json!({ "id": ["uuid"] })).unwrap();

        assert_eq!(mapping.id, vec!["uuid".to_string()]);
        assert_eq!(mapping.email, AttributeMapping::default().email);
    }
}

// =============================================================================
// Callback Request Tests
// =============================================================================

#[cfg(test)]
mod callback_tests {
    use super::*;

    #[test]
    fn test_from_query_decodes_parameters() {
        let request = CallbackRequest::from_query("?code=abc%2F1&state=s1&extra=x");

        assert_eq!(request.code(), Some("abc/1"));
        assert_eq!(request.state(), Some("s1"));
        assert_eq!(request.require_code().unwrap(), "abc/1");
        assert_eq!(request.require_state().unwrap(), "s1");
        assert_eq!(request.require_code_and_state().unwrap(), ("abc/1", "s1"));
    }

    #[test]
    fn test_from_uri() {
        let request =
            CallbackRequest::from_uri("https://auth.example.com/oauth/acme/callback?code=c&state=s#frag");
        assert_eq!(request.code(), Some("c"));
        assert_eq!(request.state(), Some("s"));

        let empty = CallbackRequest::from_uri("/oauth/acme/callback");
        assert!(empty.code().is_none());
    }

    #[test]
    fn test_missing_parameters_are_malformed() {
        let no_state = CallbackRequest::from_query("code=abc");
        assert!(matches!(
            no_state.require_state(),
            Err(KeyportError::MalformedCallback { .. })
        ));

        let no_code = CallbackRequest::from_query("state=s1");
        assert!(matches!(
            no_code.require_code(),
            Err(KeyportError::MalformedCallback { .. })
        ));

        let blank = CallbackRequest::new("", "  ");
        assert!(blank.require_code().is_err());
        assert!(blank.require_state().is_err());
        assert!(blank.require_code_and_state().is_err());
    }

    #[test]
    fn test_upstream_error_takes_precedence() {
        let request = CallbackRequest::from_query(
            "state=s1&error=access_denied&error_description=User+cancelled",
        );

        assert_eq!(
            request.upstream_error().as_deref(),
            Some("access_denied: User cancelled")
        );
        assert!(matches!(
            request.require_code(),
            Err(KeyportError::UpstreamExchange { .. })
        ));
    }

    #[test]
    fn test_session_binding() {
        let request = CallbackRequest::new("c", "s").with_session("sess-1");
        assert_eq!(request.session_id(), Some("sess-1"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct SampleOptions {
        client_id: String,
        #[serde(default)]
        scopes: Vec<String>,
    }

    #[test]
    fn test_provider_config_deserialization() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "acme",
            "type": "generic-oauth2",
            "options": { "client_id": "cid", "scopes": ["openid"] }
        }))
        .unwrap();

        assert_eq!(config.name, "acme");
        assert_eq!(config.provider_type, "generic-oauth2");

        let options: SampleOptions = config.options.decode("acme").unwrap();
        assert_eq!(options.client_id, "cid");
        assert_eq!(options.scopes, vec!["openid".to_string()]);
    }

    #[test]
    fn test_decode_failure_is_construction_error() {
        let options = DynamicOptions::from_value(json!({ "scopes": "not-a-list" })).unwrap();
        let err = options.decode::<SampleOptions>("acme").unwrap_err();

        match err {
            KeyportError::Construction { provider, .. } => assert_eq!(provider, "acme"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_options_must_be_object() {
        assert!(DynamicOptions::from_value(json!(["a"])).is_err());
        assert!(DynamicOptions::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_options_debug_hides_values() {
        let options =
            DynamicOptions::from_value(json!({ "client_secret": "s3cr3t" })).unwrap();
        let rendered = format!("{:?}", options);

        assert!(rendered.contains("client_secret"));
        assert!(!rendered.contains("s3cr3t"));
    }

    #[test]
    fn test_config_equality_compares_options() {
        let a = ProviderConfig::new(
            "acme",
            "generic-oauth2",
            DynamicOptions::from_value(json!({ "client_id": "a" })).unwrap(),
        );
        let mut b = a.clone();
        assert_eq!(a, b);

        b.options = DynamicOptions::from_value(json!({ "client_id": "b" })).unwrap();
        assert_ne!(a, b);
    }
}

// =============================================================================
// Error Tests
// =============================================================================

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(KeyportError::malformed_callback("x").status_code(), 400);
        assert_eq!(
            KeyportError::state_validation(StateRejection::Expired).status_code(),
            401
        );
        assert_eq!(KeyportError::provider_not_found("x").status_code(), 404);
        assert_eq!(KeyportError::upstream("x").status_code(), 502);
        assert_eq!(KeyportError::cancelled("x").status_code(), 504);
        assert_eq!(KeyportError::internal_error("x").status_code(), 500);
    }

    #[test]
    fn test_public_message_hides_details() {
        let err = KeyportError::upstream("token endpoint returned HTTP 500 - stack trace");
        assert!(!err.public_message().contains("stack trace"));
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_state_errors_are_security_events() {
        assert!(KeyportError::state_validation(StateRejection::Unknown).is_security_event());
        assert!(!KeyportError::upstream("x").is_security_event());
        assert_eq!(
            KeyportError::state_validation(StateRejection::Unknown).kind(),
            "state_validation"
        );
    }
}

// =============================================================================
// ID Tests
// =============================================================================

#[cfg(test)]
mod id_tests {
    use super::*;

    #[test]
    fn test_login_attempt_id_roundtrip() {
        let id = LoginAttemptId::new();
        let parsed: LoginAttemptId = id.to_prefixed().parse().unwrap();
        assert_eq!(id, parsed);

        let plain: LoginAttemptId = id.to_string().parse().unwrap();
        assert_eq!(id, plain);
    }

    #[test]
    fn test_login_attempt_ids_are_unique() {
        assert_ne!(LoginAttemptId::new(), LoginAttemptId::new());
    }
}
