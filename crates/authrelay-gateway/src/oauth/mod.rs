//! OAuth flow plumbing: the proxy orchestrator, Apple id-token
//! verification and the stateless authorization-request cookie store.

pub mod apple;
pub mod cookie_store;
pub mod proxy;

pub use apple::AppleTokenVerifier;
pub use cookie_store::{AuthRequestCookieStore, StoredAuthRequest};
pub use proxy::{ProxyFlowService, ProxyInitiation, TokenPair};
