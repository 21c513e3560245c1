//! Stateless authorization-request persistence.
//!
//! The standard (non-proxy) browser flow must survive the round trip
//! to the provider without server-side session state, so the pending
//! authorization request is serialized, encrypted and parked in a
//! short-lived cookie on the user's browser. The callback leg decrypts
//! it and requires an exact state match before trusting anything in it.

use axum::http::{header::SET_COOKIE, HeaderMap};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use authrelay_core::{CookieCipher, Provider};

/// Cookie carrying the encrypted authorization request.
pub const AUTH_REQUEST_COOKIE: &str = "oauth2_auth_request";

/// Companion cookie remembering where to send the user afterwards.
pub const REDIRECT_URI_COOKIE: &str = "oauth2_redirect_uri";

/// Authorization-request cookie lifetime: 3 minutes. Long enough to
/// log in at the provider, short enough to limit replay exposure.
pub const AUTH_REQUEST_TTL_SECS: i64 = 180;

/// Snapshot of an in-flight authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuthRequest {
    pub state: String,
    pub provider: Provider,
    /// Where the frontend wants the user after login.
    pub redirect_uri: String,
    /// Unix seconds; drives the decrypt-side TTL check.
    pub created_at: i64,
}

impl StoredAuthRequest {
    pub fn new(state: String, provider: Provider, redirect_uri: String) -> Self {
        Self {
            state,
            provider,
            redirect_uri,
            created_at: Utc::now().timestamp(),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now().timestamp() - self.created_at > AUTH_REQUEST_TTL_SECS
    }
}

/// Encrypts authorization requests into cookies and back.
pub struct AuthRequestCookieStore {
    cipher: CookieCipher,
    production: bool,
}

impl AuthRequestCookieStore {
    pub fn new(jwt_secret: &[u8], production: bool) -> Self {
        Self {
            cipher: CookieCipher::from_secret(jwt_secret),
            production,
        }
    }

    /// Serialize and encrypt the request into Set-Cookie headers.
    pub fn save(&self, request: &StoredAuthRequest) -> Option<HeaderMap> {
        let json = serde_json::to_string(request).ok()?;
        let sealed = match self.cipher.encrypt(json.as_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!("[OAuth] Failed to seal authorization request: {}", e);
                return None;
            }
        };

        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            self.cookie(AUTH_REQUEST_COOKIE, &sealed, AUTH_REQUEST_TTL_SECS)
                .parse()
                .ok()?,
        );
        headers.append(
            SET_COOKIE,
            self.cookie(
                REDIRECT_URI_COOKIE,
                &urlencoding::encode(&request.redirect_uri),
                AUTH_REQUEST_TTL_SECS,
            )
            .parse()
            .ok()?,
        );
        Some(headers)
    }

    /// Decrypt a cookie value back into a request.
    ///
    /// Returns `None` for undecryptable, expired or state-mismatched
    /// payloads; callers treat all three the same way.
    pub fn load(&self, cookie_value: &str, expected_state: &str) -> Option<StoredAuthRequest> {
        let plaintext = match self.cipher.decrypt(cookie_value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[OAuth] Authorization-request cookie rejected: {}", e);
                return None;
            }
        };
        let request: StoredAuthRequest = serde_json::from_slice(&plaintext).ok()?;

        if request.is_expired() {
            debug!("[OAuth] Authorization-request cookie expired");
            return None;
        }
        if request.state != expected_state {
            warn!("[OAuth] State mismatch on authorization-request cookie");
            return None;
        }
        Some(request)
    }

    /// Set-Cookie headers that expire both cookies after the callback.
    pub fn removal_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in [AUTH_REQUEST_COOKIE, REDIRECT_URI_COOKIE] {
            if let Ok(value) = self.cookie(name, "", 0).parse() {
                headers.append(SET_COOKIE, value);
            }
        }
        headers
    }

    fn cookie(&self, name: &str, value: &str, max_age: i64) -> String {
        let mut cookie = format!("{}={}; HttpOnly; Path=/; Max-Age={}", name, value, max_age);
        if self.production {
            cookie.push_str("; Secure; SameSite=Lax");
        }
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AuthRequestCookieStore {
        AuthRequestCookieStore::new(b"test-signing-secret", false)
    }

    fn sealed_value(store: &AuthRequestCookieStore, request: &StoredAuthRequest) -> String {
        let json = serde_json::to_string(request).unwrap();
        store.cipher.encrypt(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let store = store();
        let request = StoredAuthRequest::new(
            "state-123".to_string(),
            Provider::Google,
            "https://app.example/dashboard".to_string(),
        );

        let sealed = sealed_value(&store, &request);
        let loaded = store.load(&sealed, "state-123").unwrap();
        assert_eq!(loaded.provider, Provider::Google);
        assert_eq!(loaded.redirect_uri, "https://app.example/dashboard");
    }

    #[test]
    fn test_state_mismatch_rejected() {
        let store = store();
        let request = StoredAuthRequest::new(
            "state-123".to_string(),
            Provider::Google,
            "https://app.example".to_string(),
        );

        let sealed = sealed_value(&store, &request);
        assert!(store.load(&sealed, "state-456").is_none());
    }

    #[test]
    fn test_expired_request_rejected() {
        let store = store();
        let mut request = StoredAuthRequest::new(
            "state-123".to_string(),
            Provider::Google,
            "https://app.example".to_string(),
        );
        request.created_at -= AUTH_REQUEST_TTL_SECS + 1;

        let sealed = sealed_value(&store, &request);
        assert!(store.load(&sealed, "state-123").is_none());
    }

    #[test]
    fn test_foreign_cookie_rejected() {
        let store = store();
        let other = AuthRequestCookieStore::new(b"different-secret", false);
        let request = StoredAuthRequest::new(
            "state-123".to_string(),
            Provider::Google,
            "https://app.example".to_string(),
        );

        let sealed = sealed_value(&other, &request);
        assert!(store.load(&sealed, "state-123").is_none());
        assert!(store.load("garbage", "state-123").is_none());
    }

    #[test]
    fn test_save_emits_both_cookies() {
        let store = store();
        let request = StoredAuthRequest::new(
            "state-123".to_string(),
            Provider::GitHub,
            "https://app.example/after".to_string(),
        );

        let headers = store.save(&request).unwrap();
        let cookies: Vec<_> = headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies
            .iter()
            .any(|c| c.to_str().unwrap().starts_with("oauth2_auth_request=")));
        assert!(cookies
            .iter()
            .any(|c| c.to_str().unwrap().starts_with("oauth2_redirect_uri=")));
    }

    #[test]
    fn test_removal_headers_expire_cookies() {
        let headers = store().removal_headers();
        for value in headers.get_all(SET_COOKIE) {
            assert!(value.to_str().unwrap().contains("Max-Age=0"));
        }
    }
}
