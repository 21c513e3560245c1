//! Auth gateway server
//!
//! HTTP server exposing the proxied OAuth flow, native Apple sign-in
//! and token issuance. Self-contained with dependency injection: the
//! state store and user store are trait objects swappable per
//! deployment.

mod handlers;
pub mod logging_middleware;
pub mod rate_limit;

pub use handlers::AppState;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use authrelay_core::{spawn_sweeper, InMemoryStateStore, StateStore};

use crate::auth::auth_middleware;
use crate::config::GatewayConfig;
use crate::oauth::{AppleTokenVerifier, AuthRequestCookieStore, ProxyFlowService};
use crate::users::{InMemoryUserStore, UserStore};

/// Auth gateway server.
pub struct AuthServer {
    config: GatewayConfig,
    app_state: Arc<AppState>,
}

impl AuthServer {
    /// Build the server and its service graph from configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let registry = Arc::new(config.build_registry());
        if registry.is_local_standalone() {
            warn!("[Gateway] No OAuth providers configured; local login only");
        }

        let state_store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        let apple = Arc::new(AppleTokenVerifier::new(
            http.clone(),
            config.apple_audiences.clone(),
        ));

        let proxy = Arc::new(ProxyFlowService::new(
            registry.clone(),
            state_store.clone(),
            users.clone(),
            apple,
            http,
            config.jwt_secret.as_bytes().to_vec(),
            config.allow_synthetic_fallback,
        ));

        let cookie_store = Arc::new(AuthRequestCookieStore::new(
            config.jwt_secret.as_bytes(),
            config.is_production(),
        ));

        let app_state = Arc::new(AppState {
            config: config.clone(),
            registry,
            proxy,
            users,
            state_store,
            cookie_store,
        });

        Ok(Self { config, app_state })
    }

    /// Build the Axum router
    fn build_router(&self) -> Router {
        let app_state = self.app_state.clone();

        // Routes behind the auth middleware
        let protected = Router::new()
            .route("/api/auth/user", get(handlers::current_user))
            .layer(middleware::from_fn_with_state(
                app_state.clone(),
                auth_middleware,
            ));

        let router = Router::new()
            // Health check (public)
            .route("/health", get(handlers::health))
            // Proxied flow
            .route("/api/oauth/initiate", post(handlers::oauth_initiate))
            .route("/api/oauth/exchange", post(handlers::oauth_exchange))
            .route("/api/oauth/providers", get(handlers::oauth_providers))
            // Standard browser flow
            .route(
                "/oauth2/authorization/{provider}",
                get(handlers::oauth_authorize),
            )
            // Provider callback; Apple posts a form, everyone else GETs
            .route(
                "/login/oauth2/code/{provider}",
                get(handlers::oauth_callback).post(handlers::oauth_callback_form),
            )
            // Token lifecycle and session
            .route("/api/auth/apple-native", post(handlers::apple_native))
            .route("/api/auth/local-login", post(handlers::local_login))
            .route("/api/auth/refresh", post(handlers::auth_refresh))
            .route("/api/auth/config", get(handlers::auth_config))
            .route("/api/auth/logout", post(handlers::logout))
            .merge(protected);

        // Rate limiter for auth endpoints (token minting and provider
        // round trips)
        let rate_limiter = rate_limit::default_auth_rate_limiter();

        let mut router = router
            .with_state(app_state)
            .layer(TraceLayer::new_for_http())
            // Request/Response logging with body (DEBUG level)
            .layer(middleware::from_fn(
                logging_middleware::http_logging_middleware,
            ))
            // Rate limiting on auth endpoints
            .layer(axum::Extension(rate_limiter))
            .layer(middleware::from_fn(rate_limit::rate_limit_middleware));

        // Add CORS if enabled
        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Run the gateway server.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.addr()?;

        info!("[Gateway] Starting on {}", addr);
        info!("[Gateway] Base URL: {}", self.config.base_url);
        info!(
            "[Gateway] Providers: {:?}",
            self.app_state.registry.enabled()
        );
        info!(
            "[Gateway] CORS: {}",
            if self.config.enable_cors {
                "enabled"
            } else {
                "disabled"
            }
        );

        // Background sweep for abandoned flow state
        let sweeper = spawn_sweeper(self.app_state.state_store.clone());

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("[Gateway] Ready to accept connections");
        let result = axum::serve(listener, router).await;

        sweeper.abort();
        result.context("server terminated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            base_url: "http://localhost:8595".to_string(),
            jwt_secret: "test_secret_key_32_bytes_long!!!".to_string(),
            environment: "dev".to_string(),
            enable_cors: false,
            allow_synthetic_fallback: false,
            enabled_providers: vec![],
            apple_audiences: vec![],
            local_username: None,
            local_password: None,
        }
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> axum::response::Response {
        router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn error_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_json_field_is_invalid_request() {
        let server = AuthServer::new(test_config()).unwrap();

        // `provider` is absent entirely, so deserialization fails
        // before the handler runs; the response must still follow the
        // 400 {error, message} contract.
        let response = post_json(
            server.build_router(),
            "/api/oauth/initiate",
            r#"{"client_redirect_uri": "https://app.example/cb"}"#,
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert_eq!(body["error"], "invalid_request");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_invalid_request() {
        let server = AuthServer::new(test_config()).unwrap();

        let response = post_json(server.build_router(), "/api/oauth/exchange", "not json").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert_eq!(body["error"], "invalid_request");
    }
}
