//! Core authentication primitives for the relay gateway.
//!
//! Pure, transport-free building blocks: token signing and validation,
//! provider registry and claim mapping, flow state storage and cookie
//! payload encryption. The gateway crate wires these into HTTP.

pub mod crypto;
pub mod error;
pub mod identity;
pub mod provider;
pub mod state_store;
pub mod token;

pub use crypto::{CookieCipher, CryptoError};
pub use error::{AuthError, TokenError};
pub use identity::{flexible_bool, VerifiedIdentity};
pub use provider::{ClaimMapping, Provider, ProviderConfig, ProviderRegistry};
pub use state_store::{
    is_proxy_state, new_exchange_code, new_proxy_state, spawn_sweeper, ClientType, ExchangeGrant,
    ExchangePayload, InMemoryStateStore, PendingOAuthState, StateStore, PROXY_STATE_PREFIX,
    STATE_TTL_SECS,
};
pub use token::{
    claims_ignoring_expiry, issue_access_token, issue_refresh_token, validate, validate_refresh,
    TokenClaims, ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_TTL_SECS,
};
