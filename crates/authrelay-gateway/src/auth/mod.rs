//! Request authentication for the gateway
//!
//! Validates bearer tokens (header or session cookie) and injects the
//! authenticated user into the request context. The middleware never
//! rejects on its own: an invalid or absent token just leaves the
//! request unauthenticated and the route's extractor decides. Also
//! owns the session cookie format so handlers never build Set-Cookie
//! strings by hand.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use authrelay_core::{token, TokenClaims, ACCESS_TOKEN_TTL_SECS};

use crate::server::AppState;
use crate::users::{UserStore, DEFAULT_ROLE};

/// Name of the session cookie carrying the signed token.
pub const JWT_COOKIE: &str = "jwt";

/// Non-HttpOnly marker cookie so frontends can detect a fresh login
/// without being able to read the token itself.
pub const AUTH_SUCCESS_COOKIE: &str = "auth_success";

/// Authenticated user injected by the middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub claims: TokenClaims,
}

/// Extractor for handlers behind the auth middleware.
///
/// Handlers receive only the authenticated user, not the raw token.
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| unauthorized_response("invalid_token", "Missing or invalid access token"))
    }
}

/// Authentication middleware.
///
/// Token lookup order: `Authorization: Bearer` header first, then the
/// session cookie. Browser clients ride on the cookie; API clients and
/// native apps send the header. A missing or invalid token does NOT
/// short-circuit the request: the request proceeds unauthenticated and
/// routes requiring an [`AuthenticatedUser`] reject it themselves.
pub async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let mut authenticated = None;
    if let Some(raw_token) = extract_token(&request) {
        match token::validate(&raw_token, state.config.jwt_secret.as_bytes()) {
            Ok(claims) if !claims.is_refresh() => {
                debug!("[Auth] Valid token for {}", claims.sub);
                let role = state
                    .users
                    .find_by_email(&claims.sub)
                    .await
                    .map(|u| u.role)
                    .unwrap_or_else(|| DEFAULT_ROLE.to_string());
                let user = AuthenticatedUser {
                    user_id: claims.user_id.clone(),
                    email: claims.sub.clone(),
                    role,
                    claims,
                };
                request.extensions_mut().insert(user.clone());
                authenticated = Some(user);
            }
            Ok(_) => {
                warn!("[Auth] Refresh token presented as access token");
            }
            Err(e) => {
                warn!("[Auth] Token rejected: {}", e);
            }
        }
    } else {
        debug!("[Auth] No credentials on {}", request.uri().path());
    }

    let mut response = next.run(request).await;

    // Tag the response so the logging middleware, which sits outside
    // this one, can attribute the request to its user.
    if let Some(user) = authenticated {
        response.extensions_mut().insert(user);
    }
    response
}

fn extract_token(request: &Request<Body>) -> Option<String> {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from);
    if bearer.is_some() {
        return bearer;
    }

    request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| cookie_value(header, JWT_COOKIE))
}

/// Generate a 401 response with a machine-readable error body.
fn unauthorized_response(error: &str, description: &str) -> Response {
    let www_authenticate = format!(
        r#"Bearer realm="AuthRelay", error="{}", error_description="{}""#,
        error, description
    );

    let body = serde_json::json!({
        "error": error,
        "message": description,
    });

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, www_authenticate)],
        axum::Json(body),
    )
        .into_response()
}

/// Pull one cookie's value out of a Cookie header.
pub fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Session cookie for the signed token. HttpOnly always; Secure and
/// SameSite only in production so plain-HTTP dev setups keep working.
pub fn session_cookie(token: &str, production: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}",
        JWT_COOKIE, token, ACCESS_TOKEN_TTL_SECS
    );
    if production {
        cookie.push_str("; Secure; SameSite=Lax");
    }
    cookie
}

/// Frontend-visible login marker, same lifetime as the session cookie.
pub fn auth_success_cookie(production: bool) -> String {
    let mut cookie = format!(
        "{}=true; Path=/; Max-Age={}",
        AUTH_SUCCESS_COOKIE, ACCESS_TOKEN_TTL_SECS
    );
    if production {
        cookie.push_str("; Secure; SameSite=Lax");
    }
    cookie
}

/// Expire the session cookie (logout).
pub fn clear_session_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; Max-Age=0", JWT_COOKIE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value() {
        let header = "jwt=abc.def; auth_success=true; other=1";
        assert_eq!(cookie_value(header, "jwt"), Some("abc.def".to_string()));
        assert_eq!(
            cookie_value(header, "auth_success"),
            Some("true".to_string())
        );
        assert_eq!(cookie_value(header, "missing"), None);
        assert_eq!(cookie_value("", "jwt"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let dev = session_cookie("tok", false);
        assert!(dev.starts_with("jwt=tok"));
        assert!(dev.contains("HttpOnly"));
        assert!(dev.contains("Path=/"));
        assert!(!dev.contains("Secure"));

        let prod = session_cookie("tok", true);
        assert!(prod.contains("Secure"));
        assert!(prod.contains("SameSite=Lax"));
    }

    #[test]
    fn test_auth_success_cookie_is_frontend_readable() {
        // No HttpOnly: the frontend polls this one.
        let cookie = auth_success_cookie(false);
        assert!(!cookie.contains("HttpOnly"));
        assert!(cookie.starts_with("auth_success=true"));
    }

    #[test]
    fn test_clear_session_cookie() {
        let cookie = clear_session_cookie();
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.starts_with("jwt=;"));
    }
}
