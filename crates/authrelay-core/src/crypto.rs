//! Cookie payload encryption.
//!
//! Authorization-request snapshots travel through an untrusted client
//! cookie between the initiate and callback legs of the flow, so they
//! are sealed with AES-128-GCM. The cipher key is derived from the
//! token-signing secret (first 16 bytes of its SHA-256 digest), which
//! keeps a single secret in configuration and makes cookies from an
//! instance with a different secret undecryptable rather than
//! forgeable.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, NONCE_LEN};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,

    /// Wrong key, truncated data or tampering. Indistinguishable by
    /// design; AEAD opening reports a single failure.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("ciphertext is not valid base64url")]
    InvalidEncoding,
}

/// AES-128-GCM cipher for cookie-borne payloads.
///
/// Output layout: `base64url(nonce || ciphertext || tag)`, cookie-safe
/// without further escaping.
pub struct CookieCipher {
    key_bytes: [u8; 16],
}

impl CookieCipher {
    /// Derive the cipher key from the shared signing secret.
    pub fn from_secret(secret: &[u8]) -> Self {
        let digest = Sha256::digest(secret);
        let mut key_bytes = [0u8; 16];
        key_bytes.copy_from_slice(&digest[..16]);
        Self { key_bytes }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let unbound = UnboundKey::new(&AES_128_GCM, &self.key_bytes)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let key = LessSafeKey::new(unbound);

        // Fresh random nonce per cookie; GCM nonce reuse under one key
        // is catastrophic.
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + in_out.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&in_out);

        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let combined = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidEncoding)?;
        if combined.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let unbound = UnboundKey::new(&AES_128_GCM, &self.key_bytes)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let key = LessSafeKey::new(unbound);

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = CookieCipher::from_secret(b"my-signing-secret");
        let plaintext = b"{\"state\":\"oauth_proxy_abc\"}";

        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_ne!(encrypted.as_bytes(), plaintext.as_slice());

        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = CookieCipher::from_secret(b"secret-one");
        let other = CookieCipher::from_secret(b"secret-two");

        let encrypted = cipher.encrypt(b"sensitive").unwrap();
        assert!(matches!(
            other.decrypt(&encrypted),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = CookieCipher::from_secret(b"secret");
        let encrypted = cipher.encrypt(b"payload").unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&encrypted).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_different_nonces() {
        let cipher = CookieCipher::from_secret(b"secret");
        let a = cipher.encrypt(b"same input").unwrap();
        let b = cipher.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_input() {
        let cipher = CookieCipher::from_secret(b"secret");
        assert!(matches!(
            cipher.decrypt("not base64!!!"),
            Err(CryptoError::InvalidEncoding)
        ));
        assert!(matches!(
            cipher.decrypt("c2hvcnQ"),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
