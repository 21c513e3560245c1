//! Session handling across the gateway and core crates: signed tokens
//! riding in cookies, and the encrypted authorization-request cookie.

use axum::http::header::SET_COOKIE;
use pretty_assertions::assert_eq;

use authrelay_core::{token, Provider};
use authrelay_gateway::auth::{cookie_value, session_cookie, JWT_COOKIE};
use authrelay_gateway::oauth::cookie_store::{
    AuthRequestCookieStore, StoredAuthRequest, AUTH_REQUEST_COOKIE,
};

use tests::TEST_SECRET;

#[test]
fn test_session_cookie_round_trip() {
    let access = token::issue_access_token("ada@example.com", "user-1", TEST_SECRET, 3600);

    // The cookie the gateway sets can be read back with the same
    // parser the middleware uses, and the token inside still verifies.
    let cookie = session_cookie(&access, false);
    let recovered = cookie_value(&cookie, JWT_COOKIE).unwrap();

    let claims = token::validate(&recovered, TEST_SECRET).unwrap();
    assert_eq!(claims.sub, "ada@example.com");
    assert_eq!(claims.user_id, "user-1");
    assert!(!claims.is_refresh());
}

#[test]
fn test_refresh_token_is_not_a_session_token() {
    let refresh = token::issue_refresh_token("ada@example.com", "user-1", TEST_SECRET, 3600);
    let access = token::issue_access_token("ada@example.com", "user-1", TEST_SECRET, 3600);

    assert!(token::validate_refresh(&refresh, TEST_SECRET));
    assert!(!token::validate_refresh(&access, TEST_SECRET));
}

#[test]
fn test_token_rejected_under_different_secret() {
    let access = token::issue_access_token("ada@example.com", "user-1", TEST_SECRET, 3600);
    assert!(token::validate(&access, b"some_other_secret_32_bytes_long!").is_err());
}

#[test]
fn test_auth_request_cookie_survives_the_header_round_trip() {
    let store = AuthRequestCookieStore::new(TEST_SECRET, false);
    let request = StoredAuthRequest::new(
        "state-abc".to_string(),
        Provider::Google,
        "https://app.example/dashboard".to_string(),
    );

    // Save emits Set-Cookie headers; pull the sealed value back out
    // the way a returning browser request would present it.
    let headers = store.save(&request).unwrap();
    let sealed = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|c| cookie_value(c, AUTH_REQUEST_COOKIE))
        .unwrap();

    let loaded = store.load(&sealed, "state-abc").unwrap();
    assert_eq!(loaded.provider, Provider::Google);
    assert_eq!(loaded.redirect_uri, "https://app.example/dashboard");

    // The same cookie under a different state is worthless.
    assert!(store.load(&sealed, "state-xyz").is_none());
}
