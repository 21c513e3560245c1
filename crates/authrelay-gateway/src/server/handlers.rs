//! HTTP handlers for the auth API.
//!
//! Thin layer: parse the request, call the flow service, map the
//! result. Error bodies are always `{"error": code, "message": text}`
//! with a generic message so provider internals never leak to callers.

use axum::{
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use authrelay_core::{
    is_proxy_state, AuthError, ExchangePayload, Provider, ProviderRegistry, StateStore,
};

use crate::auth::{
    auth_success_cookie, clear_session_cookie, cookie_value, session_cookie, AuthenticatedUser,
};
use crate::config::GatewayConfig;
use crate::oauth::cookie_store::AUTH_REQUEST_COOKIE;
use crate::oauth::proxy::build_authorize_url;
use crate::oauth::{AuthRequestCookieStore, ProxyFlowService, StoredAuthRequest, TokenPair};
use crate::users::UserStore;

/// Shared state for all handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<ProviderRegistry>,
    pub proxy: Arc<ProxyFlowService>,
    pub users: Arc<dyn UserStore>,
    pub state_store: Arc<dyn StateStore>,
    pub cookie_store: Arc<AuthRequestCookieStore>,
}

/// Wire-level error response.
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Everything is the caller's problem except a genuine
        // server-side failure.
        let status = match &self.0 {
            AuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };

        // Full detail stays server-side; the wire gets the code and a
        // generic message.
        warn!("[API] Request failed: {}", self.0);
        let message = match &self.0 {
            AuthError::InvalidRequest(detail) => detail.clone(),
            AuthError::InvalidProvider(id) => format!("Provider '{}' is not available", id),
            AuthError::InvalidGrant(_) => "Authorization grant is invalid or expired".to_string(),
            AuthError::AuthenticationFailed(_) => "Authentication failed".to_string(),
            AuthError::ServerError(_) => "Upstream provider request failed".to_string(),
        };

        let body = json!({
            "error": self.0.code(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

/// JSON extractor whose rejection follows the API error contract.
///
/// A missing field or malformed body never reaches the handler; the
/// default extractor answers those with a plain-text 422, so this
/// wrapper routes the rejection through [`ApiError`] to keep every
/// failure on the documented `{error, message}` 400 shape.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(|rejection| AuthError::InvalidRequest(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

// ---------------------------------------------------------------------
// Request/response DTOs
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub provider: String,
    pub client_redirect_uri: String,
    #[serde(default = "default_client_type")]
    pub client_type: String,
    #[serde(default)]
    pub environment: Option<String>,
}

fn default_client_type() -> String {
    "web".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LocalLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AppleNativeRequest {
    pub identity_token: String,
    /// One-shot profile fields from Sign in with Apple; the platform
    /// hands them to the app only on first authorization.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

/// Query/form parameters a provider callback can carry.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub role: String,
}

impl From<crate::users::UserRecord> for UserResponse {
    fn from(user: crate::users::UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            picture: user.picture,
            role: user.role,
        }
    }
}

// ---------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------

/// Health check endpoint
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "authrelay-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/oauth/initiate - start a proxied flow.
pub async fn oauth_initiate(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<InitiateRequest>,
) -> Result<Json<Value>, ApiError> {
    let environment = request
        .environment
        .unwrap_or_else(|| state.config.environment.clone());

    let initiation = state
        .proxy
        .initiate(
            &request.provider,
            &request.client_redirect_uri,
            &request.client_type,
            &environment,
        )
        .await?;

    Ok(Json(json!({
        "auth_url": initiation.auth_url,
        "state": initiation.state,
        "expires_in": initiation.expires_in,
    })))
}

/// POST /api/oauth/exchange - redeem a one-time code for tokens.
///
/// Web clients also get the session cookie so subsequent browser
/// requests authenticate without a header.
pub async fn oauth_exchange(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ExchangeRequest>,
) -> Result<Response, ApiError> {
    let pair = state.proxy.exchange(&request.code, &request.state).await?;
    Ok(token_response(&state, pair, &[]))
}

/// GET /api/oauth/providers - enabled provider ids plus the accepted
/// client-type and environment vocabularies.
pub async fn oauth_providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<&str> = state
        .registry
        .enabled()
        .iter()
        .map(|p| p.as_str())
        .collect();
    Json(json!({
        "providers": providers,
        "client_types": ["web", "mobile", "desktop"],
        "environments": ["dev", "staging", "prod"],
    }))
}

/// GET /oauth2/authorization/{provider} - standard browser flow entry.
///
/// Mints an unprefixed state, parks the authorization request in an
/// encrypted cookie and redirects the browser to the provider.
pub async fn oauth_authorize(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, ApiError> {
    let config = state.registry.find_by_id(&provider_id)?;

    let flow_state = Uuid::new_v4().to_string();
    let auth_url = build_authorize_url(config, &flow_state)?;

    let redirect_uri = params
        .redirect_uri
        .unwrap_or_else(|| format!("{}/", state.config.base_url));
    let request = StoredAuthRequest::new(flow_state, config.provider, redirect_uri);
    let cookies = state.cookie_store.save(&request).ok_or_else(|| {
        AuthError::ServerError("failed to persist authorization request".to_string())
    })?;

    Ok((cookies, Redirect::temporary(&auth_url)).into_response())
}

/// GET /login/oauth2/code/{provider} - provider redirect callback.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    handle_callback(state, provider_id, headers, params).await
}

/// POST /login/oauth2/code/{provider} - form_post callback (Apple).
pub async fn oauth_callback_form(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    Form(params): Form<CallbackParams>,
) -> Result<Response, ApiError> {
    handle_callback(state, provider_id, headers, params).await
}

/// Shared callback logic. Proxy-prefixed states go through the proxy
/// completion path; everything else is the standard cookie-backed
/// browser flow.
async fn handle_callback(
    state: Arc<AppState>,
    provider_id: String,
    headers: HeaderMap,
    params: CallbackParams,
) -> Result<Response, ApiError> {
    let flow_state = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest("missing state parameter".to_string()))?;

    let provider: Provider = provider_id
        .parse()
        .map_err(|_| AuthError::InvalidProvider(provider_id.clone()))?;

    // Proxy flow: the state came from `initiate`. With a code in hand
    // the flow completes and the user bounces to the client's own
    // redirect URI; without one there is nothing to complete and the
    // callback falls through to the default error page.
    if is_proxy_state(&flow_state) {
        match params.code.filter(|c| !c.is_empty()) {
            Some(code) => {
                let redirect = state
                    .proxy
                    .complete_proxy_flow(
                        &flow_state,
                        ExchangePayload::Placeholder {
                            provider,
                            authorization_code: code,
                        },
                    )
                    .await?;
                return Ok(Redirect::temporary(&redirect).into_response());
            }
            None => {
                warn!(
                    "[OAuth] Proxy callback for {} without code (error: {:?})",
                    provider, params.error
                );
                return Ok(error_page_redirect(&state));
            }
        }
    }

    // Standard flow: the authorization request rides in the encrypted
    // cookie, and its state must match exactly.
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let stored = cookie_value(cookie_header, AUTH_REQUEST_COOKIE)
        .and_then(|value| state.cookie_store.load(&value, &flow_state))
        .ok_or_else(|| {
            AuthError::InvalidGrant("authorization request missing or mismatched".to_string())
        })?;

    if let Some(error) = params.error {
        warn!("[OAuth] Provider {} returned error: {}", provider, error);
        let mut response = error_page_redirect(&state);
        response
            .headers_mut()
            .extend(state.cookie_store.removal_headers());
        return Ok(response);
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest("missing code parameter".to_string()))?;

    let (pair, _user) = state.proxy.complete_standard_login(provider, &code).await?;

    // Log the browser in via cookies and send it back where the
    // frontend asked.
    let production = state.config.is_production();
    let mut response = Redirect::temporary(&stored.redirect_uri).into_response();
    let response_headers = response.headers_mut();
    response_headers.extend(state.cookie_store.removal_headers());
    if let Ok(value) = session_cookie(&pair.access_token, production).parse() {
        response_headers.append(header::SET_COOKIE, value);
    }
    if let Ok(value) = auth_success_cookie(production).parse() {
        response_headers.append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// POST /api/auth/apple-native - native Sign in with Apple.
pub async fn apple_native(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<AppleNativeRequest>,
) -> Result<Response, ApiError> {
    if request.identity_token.trim().is_empty() {
        return Err(AuthError::InvalidRequest("identity_token is required".to_string()).into());
    }

    let (pair, user, is_private_email) = state
        .proxy
        .apple_native(
            &request.identity_token,
            request.email.as_deref(),
            request.given_name.as_deref(),
            request.family_name.as_deref(),
        )
        .await?;
    Ok(token_response(
        &state,
        pair,
        &[
            ("email", json!(user.email)),
            ("is_private_email", json!(is_private_email)),
        ],
    ))
}

/// POST /api/auth/local-login - standalone-mode login.
pub async fn local_login(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<LocalLoginRequest>,
) -> Result<Response, ApiError> {
    // Only available when no external provider is configured.
    if !state.registry.is_local_standalone() {
        return Err(AuthError::InvalidRequest(
            "local login is disabled when OAuth providers are configured".to_string(),
        )
        .into());
    }

    let Some(expected_password) = state.config.local_password.as_deref() else {
        return Err(
            AuthError::InvalidRequest("local login credentials are not configured".to_string())
                .into(),
        );
    };
    let username_ok = state
        .config
        .local_username
        .as_deref()
        .map(|u| u == request.username)
        .unwrap_or(true);
    if !username_ok || request.password != expected_password {
        return Err(AuthError::AuthenticationFailed("bad local credentials".to_string()).into());
    }

    let (pair, user) = state.proxy.local_login(&request.username).await?;
    Ok(token_response(&state, pair, &[("role", json!(user.role))]))
}

/// POST /api/auth/refresh - rotate a refresh token.
pub async fn auth_refresh(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Response, ApiError> {
    let pair = state.proxy.refresh(&request.refresh_token).await?;
    Ok(token_response(&state, pair, &[]))
}

/// GET /api/auth/config - what login methods the frontend can offer.
/// Keys are camelCase for the frontend's consumption.
pub async fn auth_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<&str> = state
        .registry
        .enabled()
        .iter()
        .map(|p| p.as_str())
        .collect();
    Json(json!({
        "enabledProviders": providers,
        "localStandaloneMode": state.registry.is_local_standalone(),
    }))
}

/// GET /api/auth/user - the authenticated user's record.
pub async fn current_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    let record = state
        .users
        .find_by_email(&user.email)
        .await
        .ok_or_else(|| AuthError::AuthenticationFailed("user no longer exists".to_string()))?;
    Ok(Json(record.into()))
}

/// POST /api/auth/logout - expire the session cookie.
pub async fn logout() -> Response {
    let mut response = (StatusCode::OK, Json(json!({"status": "logged_out"}))).into_response();
    if let Ok(value) = clear_session_cookie().parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

/// Redirect to the frontend's generic error page.
fn error_page_redirect(state: &AppState) -> Response {
    Redirect::temporary(&format!("{}/?error=true", state.config.base_url)).into_response()
}

/// Token-pair JSON plus session cookies for browser clients. Extra
/// top-level fields ride along for endpoint-specific responses.
fn token_response(state: &AppState, pair: TokenPair, extra: &[(&str, Value)]) -> Response {
    let production = state.config.is_production();
    let mut body = json!({
        "access_token": pair.access_token,
        "token_type": pair.token_type,
        "expires_in": pair.expires_in,
        "refresh_token": pair.refresh_token,
    });
    for (key, value) in extra {
        body[*key] = value.clone();
    }
    let mut response = Json(body).into_response();

    let headers = response.headers_mut();
    if let Ok(value) = session_cookie(&pair.access_token, production).parse() {
        headers.append(header::SET_COOKIE, value);
    }
    if let Ok(value) = auth_success_cookie(production).parse() {
        headers.append(header::SET_COOKIE, value);
    }
    response
}
