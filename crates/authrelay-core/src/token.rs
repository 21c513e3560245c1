//! Signed bearer/refresh tokens issued by this server.
//!
//! Token format: `base64url(payload).base64url(signature)` where the
//! signature is HMAC-SHA256 over the encoded payload. The payload is a
//! JSON object with `sub` (email), `user_id`, `iat`, `exp` and
//! `token_type` (`access` or `refresh`) claims.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Default access token lifetime: 24 hours.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Default refresh token lifetime: 30 days.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Claims embedded in a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user's email address.
    pub sub: String,
    /// Stable internal user id.
    pub user_id: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// `access` or `refresh`.
    pub token_type: String,
}

impl TokenClaims {
    pub fn is_refresh(&self) -> bool {
        self.token_type == "refresh"
    }
}

/// Issue a signed access token for the given subject.
pub fn issue_access_token(email: &str, user_id: &str, secret: &[u8], ttl_secs: i64) -> String {
    issue(email, user_id, "access", secret, ttl_secs)
}

/// Issue a signed refresh token. Carries the `token_type=refresh`
/// marker claim so an access token can never be replayed as a refresh
/// token.
pub fn issue_refresh_token(email: &str, user_id: &str, secret: &[u8], ttl_secs: i64) -> String {
    issue(email, user_id, "refresh", secret, ttl_secs)
}

fn issue(email: &str, user_id: &str, token_type: &str, secret: &[u8], ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TokenClaims {
        sub: email.to_string(),
        user_id: user_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
        token_type: token_type.to_string(),
    };

    // Serializing a plain struct cannot fail.
    let payload = serde_json::to_string(&claims).unwrap_or_default();
    sign_token(&payload, secret)
}

/// Validate a token and extract its claims.
///
/// Pure function of the token and secret: invalid signature, malformed
/// structure, wrong claim shape and expiry each resolve to a distinct
/// [`TokenError`] rather than an unchecked fault.
pub fn validate(token: &str, secret: &[u8]) -> Result<TokenClaims, TokenError> {
    let claims = parse_and_verify(token, secret)?;

    let now = chrono::Utc::now().timestamp();
    if now > claims.exp {
        debug!("[Token] Expired at {}, now is {}", claims.exp, now);
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Validate a refresh token. Returns `false` for any invalid token and
/// for well-formed, unexpired tokens missing the `token_type=refresh`
/// claim.
pub fn validate_refresh(token: &str, secret: &[u8]) -> bool {
    match validate(token, secret) {
        Ok(claims) if claims.is_refresh() => true,
        Ok(_) => {
            debug!("[Token] Not a refresh token (missing or invalid token_type claim)");
            false
        }
        Err(e) => {
            debug!("[Token] Refresh validation failed: {}", e);
            false
        }
    }
}

/// Extract claims from a token even if it is expired.
///
/// Renewal-only leniency: lets the refresh flow read user identity out
/// of an expired refresh token. The signature is still enforced.
pub fn claims_ignoring_expiry(token: &str, secret: &[u8]) -> Result<TokenClaims, TokenError> {
    parse_and_verify(token, secret)
}

fn parse_and_verify(token: &str, secret: &[u8]) -> Result<TokenClaims, TokenError> {
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 2 {
        return Err(TokenError::Malformed(format!(
            "expected 2 parts, got {}",
            parts.len()
        )));
    }

    let payload_b64 = parts[0];
    let signature_b64 = parts[1];

    // Verify signature before touching the payload.
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| TokenError::Malformed("invalid secret length".to_string()))?;
    mac.update(payload_b64.as_bytes());

    let expected_sig = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::Malformed("signature is not base64url".to_string()))?;
    if mac.verify_slice(&expected_sig).is_err() {
        return Err(TokenError::InvalidSignature);
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed("payload is not base64url".to_string()))?;
    let claims: TokenClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|e| TokenError::Malformed(format!("payload claims: {}", e)))?;

    match claims.token_type.as_str() {
        "access" | "refresh" => Ok(claims),
        other => Err(TokenError::Unsupported(format!(
            "unknown token_type: {}",
            other
        ))),
    }
}

fn sign_token(payload: &str, secret: &[u8]) -> String {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload_b64.as_bytes());
    let signature = mac.finalize().into_bytes();

    format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(signature))
}
