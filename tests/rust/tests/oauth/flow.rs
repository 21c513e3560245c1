//! Proxied OAuth flow tests against a mock provider.
//!
//! These exercise the deferred exchange leg end to end: initiate,
//! provider callback with a raw code, then `exchange(code, state)`
//! performing the real token + userinfo round trips against wiremock.

use authrelay_core::{token, ExchangePayload, Provider};
use authrelay_gateway::users::UserStore;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tests::{flow_harness, mock_provider_config, query_param, FlowHarness, TEST_SECRET};

/// Initiate a flow and simulate the provider callback, returning the
/// one-time exchange code and the state.
async fn initiate_and_callback(harness: &FlowHarness, provider: Provider) -> (String, String) {
    let init = harness
        .service
        .initiate(provider.as_str(), "myapp://auth/done", "mobile", "dev")
        .await
        .unwrap();

    let redirect = harness
        .service
        .complete_proxy_flow(
            &init.state,
            ExchangePayload::Placeholder {
                provider,
                authorization_code: "raw-provider-code".to_string(),
            },
        )
        .await
        .unwrap();

    (query_param(&redirect, "code").unwrap(), init.state)
}

#[tokio::test]
async fn test_google_flow_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=raw-provider-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "provider-access-token",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "g-123",
            "email": "ada@example.com",
            "email_verified": true,
            "name": "Ada Lovelace",
            "picture": "https://example.com/ada.png",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::Google, &server.uri())],
        false,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::Google).await;

    let pair = harness.service.exchange(&code, &state).await.unwrap();
    assert_eq!(pair.token_type, "Bearer");

    let claims = token::validate(&pair.access_token, TEST_SECRET).unwrap();
    assert_eq!(claims.sub, "ada@example.com");
    assert!(token::validate_refresh(&pair.refresh_token, TEST_SECRET));

    let user = harness.users.find_by_email("ada@example.com").await.unwrap();
    assert_eq!(user.name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(user.provider, Some(Provider::Google));

    // Replay of the same code/state pair fails: both were consumed.
    assert!(harness.service.exchange(&code, &state).await.is_err());
}

#[tokio::test]
async fn test_microsoft_repeats_scope_and_falls_back_on_email() {
    let server = MockServer::start().await;

    // Microsoft's token endpoint requires the scopes to be repeated on
    // the exchange; the mock only answers when they are.
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("scope=openid+profile+email+User.Read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ms-access-token",
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Graph payload with no `mail` field; the fallback chain lands on
    // userPrincipalName.
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ms-42",
            "userPrincipalName": "grace@contoso.com",
            "displayName": "Grace Hopper",
        })))
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::Microsoft, &server.uri())],
        false,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::Microsoft).await;

    let pair = harness.service.exchange(&code, &state).await.unwrap();
    let claims = token::validate(&pair.access_token, TEST_SECRET).unwrap();
    assert_eq!(claims.sub, "grace@contoso.com");

    let user = harness.users.find_by_email("grace@contoso.com").await.unwrap();
    assert_eq!(user.name.as_deref(), Some("Grace Hopper"));
}

#[tokio::test]
async fn test_github_numeric_id_and_avatar() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gh-access-token",
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 583231,
            "email": "octo@example.com",
            "name": "Octocat",
            "avatar_url": "https://avatars.githubusercontent.com/u/583231",
        })))
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::GitHub, &server.uri())],
        false,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::GitHub).await;

    harness.service.exchange(&code, &state).await.unwrap();

    let user = harness.users.find_by_email("octo@example.com").await.unwrap();
    assert_eq!(
        user.picture.as_deref(),
        Some("https://avatars.githubusercontent.com/u/583231")
    );
}

#[tokio::test]
async fn test_github_hidden_email_resolved_from_emails_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gh-access-token",
        })))
        .mount(&server)
        .await;

    // Profile with the email hidden.
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 99,
            "email": null,
            "name": "Ghost",
        })))
        .mount(&server)
        .await;

    // The emails endpoint lists several addresses; the primary
    // verified one wins over an earlier verified secondary.
    Mock::given(method("GET"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"email": "a@x.com", "primary": false, "verified": true},
            {"email": "b@x.com", "primary": true, "verified": true},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::GitHub, &server.uri())],
        false,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::GitHub).await;

    let pair = harness.service.exchange(&code, &state).await.unwrap();
    let claims = token::validate(&pair.access_token, TEST_SECRET).unwrap();
    assert_eq!(claims.sub, "b@x.com");

    let user = harness.users.find_by_email("b@x.com").await.unwrap();
    assert_eq!(user.name.as_deref(), Some("Ghost"));
}

#[tokio::test]
async fn test_token_endpoint_failure_surfaces_as_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::Google, &server.uri())],
        false,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::Google).await;

    let err = harness.service.exchange(&code, &state).await.unwrap_err();
    assert_eq!(err.code(), "server_error");
}

#[tokio::test]
async fn test_synthetic_fallback_on_failed_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::Google, &server.uri())],
        true,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::Google).await;

    // With the fallback enabled, a dead provider still yields a usable
    // pair under a deterministic synthetic identity.
    let pair = harness.service.exchange(&code, &state).await.unwrap();
    let claims = token::validate(&pair.access_token, TEST_SECRET).unwrap();
    assert!(claims.sub.ends_with("@synthetic.local"));
    assert!(claims.sub.starts_with("google_"));
}

#[tokio::test]
async fn test_missing_access_token_is_authentication_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "bad_verification_code",
        })))
        .mount(&server)
        .await;

    let harness = flow_harness(
        vec![mock_provider_config(Provider::GitHub, &server.uri())],
        false,
    );
    let (code, state) = initiate_and_callback(&harness, Provider::GitHub).await;

    let err = harness.service.exchange(&code, &state).await.unwrap_err();
    assert_eq!(err.code(), "authentication_failed");
}
