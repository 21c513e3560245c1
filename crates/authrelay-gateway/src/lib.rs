//! AuthRelay gateway: HTTP surface over the core auth primitives.
//!
//! Exposes the proxied OAuth flow, the standard browser flow, native
//! Apple sign-in, local standalone login and token refresh.

pub mod auth;
pub mod config;
pub mod logging;
pub mod oauth;
pub mod server;
pub mod users;

pub use config::GatewayConfig;
pub use server::AuthServer;
