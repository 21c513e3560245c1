//! Shared test utilities for AuthRelay integration tests.

use std::sync::Arc;

use authrelay_core::{InMemoryStateStore, Provider, ProviderConfig, ProviderRegistry, StateStore};
use authrelay_gateway::oauth::{AppleTokenVerifier, ProxyFlowService};
use authrelay_gateway::users::{InMemoryUserStore, UserStore};

/// Signing secret shared by every integration test.
pub const TEST_SECRET: &[u8] = b"integration_test_secret_32_bytes";

/// Provider config whose endpoints all point at a mock HTTP server.
pub fn mock_provider_config(provider: Provider, server_url: &str) -> ProviderConfig {
    let mut config = ProviderConfig::well_known(
        provider,
        "test-client-id".to_string(),
        "test-client-secret".to_string(),
        format!("{}/login/oauth2/code/{}", server_url, provider),
    );
    config.authorization_endpoint = format!("{}/authorize", server_url);
    config.token_endpoint = format!("{}/token", server_url);
    config.userinfo_endpoint = format!("{}/userinfo", server_url);
    if config.emails_endpoint.is_some() {
        config.emails_endpoint = Some(format!("{}/emails", server_url));
    }
    config
}

/// A flow service wired to in-memory stores, with handles to both so
/// tests can inspect state directly.
pub struct FlowHarness {
    pub service: ProxyFlowService,
    pub store: Arc<dyn StateStore>,
    pub users: Arc<dyn UserStore>,
}

pub fn flow_harness(configs: Vec<ProviderConfig>, allow_synthetic: bool) -> FlowHarness {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let http = reqwest::Client::new();

    let service = ProxyFlowService::new(
        Arc::new(ProviderRegistry::new(configs)),
        store.clone(),
        users.clone(),
        Arc::new(AppleTokenVerifier::new(http.clone(), vec![])),
        http,
        TEST_SECRET.to_vec(),
        allow_synthetic,
    );

    FlowHarness {
        service,
        store,
        users,
    }
}

/// Extract one query parameter from a redirect URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
}
