//! Apple identity-token verification.
//!
//! Apple has no userinfo endpoint; identity comes from an RS256-signed
//! id_token. Verification resolves the signing key by `kid` against
//! Apple's published JWKS, caching keys so the steady state needs no
//! network round trip. An unknown `kid` triggers one refetch (key
//! rotation) before failing.

use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use authrelay_core::{AuthError, Provider, VerifiedIdentity};

const APPLE_ISSUER: &str = "https://appleid.apple.com";
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// RSA public key material as published in the JWKS document.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: String,
    e: String,
}

/// Verifies Apple id_tokens against the Apple JWKS.
pub struct AppleTokenVerifier {
    http: reqwest::Client,
    jwks_url: String,
    /// kid -> RSA components, filled lazily from the JWKS.
    keys: DashMap<String, Jwk>,
    /// Accepted `aud` values (service id, native bundle ids). Empty
    /// disables the audience check for single-tenant setups.
    audiences: Vec<String>,
}

impl AppleTokenVerifier {
    pub fn new(http: reqwest::Client, audiences: Vec<String>) -> Self {
        Self {
            http,
            jwks_url: APPLE_JWKS_URL.to_string(),
            keys: DashMap::new(),
            audiences,
        }
    }

    /// Verify an id_token and extract the identity it asserts.
    pub async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AuthError> {
        let header = decode_header(id_token)
            .map_err(|e| AuthError::AuthenticationFailed(format!("bad token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::AuthenticationFailed("token has no kid".to_string()))?;

        let jwk = match self.cached_key(&kid) {
            Some(jwk) => jwk,
            None => {
                // Unknown kid: refresh once, Apple rotates keys.
                self.refresh_keys().await?;
                self.cached_key(&kid).ok_or_else(|| {
                    AuthError::AuthenticationFailed(format!("no signing key with kid {}", kid))
                })?
            }
        };

        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AuthError::ServerError(format!("bad JWKS key material: {}", e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[APPLE_ISSUER]);
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }

        let data = decode::<Value>(id_token, &decoding_key, &validation)
            .map_err(|e| AuthError::AuthenticationFailed(format!("token rejected: {}", e)))?;

        debug!("[Apple] Verified id_token for kid {}", kid);
        Ok(VerifiedIdentity::from_attributes(Provider::Apple, data.claims))
    }

    fn cached_key(&self, kid: &str) -> Option<Jwk> {
        self.keys.get(kid).map(|k| k.clone())
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        info!("[Apple] Fetching JWKS from {}", self.jwks_url);
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::ServerError(format!("JWKS fetch failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AuthError::ServerError(format!("JWKS fetch failed: {}", e)))?
            .json()
            .await
            .map_err(|e| AuthError::ServerError(format!("JWKS parse failed: {}", e)))?;

        for key in jwks.keys {
            if key.kty != "RSA" {
                warn!("[Apple] Skipping non-RSA JWKS key {}", key.kid);
                continue;
            }
            self.keys.insert(key.kid.clone(), key);
        }
        Ok(())
    }
}

/// Merge the client-supplied profile fields from Sign in with Apple
/// into a verified identity. Apple hands the user's name to the app
/// only on first authorization, outside the id_token, so the values
/// the client forwards win over anything in the token claims.
pub fn merge_native_profile(
    mut identity: VerifiedIdentity,
    email: Option<&str>,
    given_name: Option<&str>,
    family_name: Option<&str>,
) -> VerifiedIdentity {
    if let Some(given) = filled(given_name) {
        identity.given_name = Some(given);
    }
    if let Some(family) = filled(family_name) {
        identity.family_name = Some(family);
    }
    if identity.given_name.is_some() || identity.family_name.is_some() {
        let joined = format!(
            "{} {}",
            identity.given_name.as_deref().unwrap_or(""),
            identity.family_name.as_deref().unwrap_or("")
        );
        let joined = joined.trim().to_string();
        if !joined.is_empty() {
            identity.name = Some(joined);
        }
    }

    if let Some(email) = filled(email) {
        // An address that only the client asserted is not verified.
        if identity.email.is_none() {
            identity.email_verified = false;
        }
        identity.email = Some(email);
    }

    identity
}

fn filled(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_garbage_token_rejected_without_network() {
        let verifier = AppleTokenVerifier::new(reqwest::Client::new(), vec![]);

        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert_eq!(err.code(), "authentication_failed");
    }

    #[test]
    fn test_jwks_parsing_skips_non_rsa() {
        let verifier = AppleTokenVerifier::new(reqwest::Client::new(), vec![]);
        let jwks: JwkSet = serde_json::from_value(json!({
            "keys": [
                {"kid": "rsa-1", "kty": "RSA", "n": "abc", "e": "AQAB"},
                {"kid": "ec-1", "kty": "EC", "n": "", "e": ""}
            ]
        }))
        .unwrap();

        for key in jwks.keys {
            if key.kty == "RSA" {
                verifier.keys.insert(key.kid.clone(), key);
            }
        }
        assert!(verifier.cached_key("rsa-1").is_some());
        assert!(verifier.cached_key("ec-1").is_none());
    }

    #[test]
    fn test_merge_native_profile_first_login() {
        let identity = VerifiedIdentity::from_attributes(
            Provider::Apple,
            json!({"sub": "apple-1", "email": "u@privaterelay.appleid.com", "email_verified": "true"}),
        );

        let merged = merge_native_profile(identity, None, Some("Ada"), Some("Lovelace"));

        assert_eq!(merged.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(merged.given_name.as_deref(), Some("Ada"));
        // Token email stays, and stays verified.
        assert_eq!(merged.email.as_deref(), Some("u@privaterelay.appleid.com"));
        assert!(merged.email_verified);
    }

    #[test]
    fn test_merge_native_profile_client_fields_win() {
        let identity = VerifiedIdentity::from_attributes(
            Provider::Apple,
            json!({"sub": "apple-1", "email": "token@example.com", "email_verified": true}),
        );

        let merged = merge_native_profile(identity, Some("client@example.com"), None, None);
        assert_eq!(merged.email.as_deref(), Some("client@example.com"));
    }

    #[test]
    fn test_merge_native_profile_absent() {
        let identity = VerifiedIdentity::from_attributes(
            Provider::Apple,
            json!({"sub": "apple-1", "email": "u@example.com", "email_verified": true}),
        );

        let merged = merge_native_profile(identity, None, None, None);
        assert!(merged.name.is_none());
        assert_eq!(merged.email.as_deref(), Some("u@example.com"));
    }
}
