//! Error taxonomy shared by the gateway handlers and core services.
//!
//! Everything in this subsystem is a per-request failure; nothing here
//! is fatal at the process level.

use thiserror::Error;

/// Authentication/authorization failure categories.
///
/// The string carried by each variant is safe to log server-side with
/// full context; handlers map variants to the wire-level `error` code
/// and return only a generic human message to avoid leaking
/// provider-internal details.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Required request fields are missing or blank.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider id does not resolve in the registry.
    #[error("unknown OAuth provider: {0}")]
    InvalidProvider(String),

    /// Expired/unknown state or code, or a replayed code.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Signature or claims verification failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Unexpected failure: key-set fetch, provider token endpoint
    /// non-200, and similar.
    #[error("server error: {0}")]
    ServerError(String),
}

impl AuthError {
    /// Wire-level error code returned to the caller.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::InvalidProvider(_) => "invalid_provider",
            AuthError::InvalidGrant(_) => "invalid_grant",
            AuthError::AuthenticationFailed(_) => "authentication_failed",
            AuthError::ServerError(_) => "server_error",
        }
    }
}

/// Token validation failure kinds.
///
/// Validation is pure and side-effect-free; callers decide what to do
/// with a failure. The kinds are distinct so the caller can log the
/// precise reason without string matching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token is expired")]
    Expired,

    #[error("unsupported token: {0}")]
    Unsupported(String),
}
