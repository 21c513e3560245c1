//! Gateway configuration loaded from the environment.
//!
//! All knobs live under the `AUTHRELAY_` prefix. Missing secrets fail
//! fast at startup; missing provider credentials merely disable that
//! provider.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::warn;

use authrelay_core::{Provider, ProviderConfig, ProviderRegistry};

/// Gateway server configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL (provider callbacks point here)
    pub base_url: String,
    /// Shared secret for token signing and cookie key derivation
    pub jwt_secret: String,
    /// Deployment environment label ("dev", "staging", "production")
    pub environment: String,
    /// Enable CORS for browser access
    pub enable_cors: bool,
    /// Mint a synthetic user when a provider returns no email.
    /// Off by default; test environments only.
    pub allow_synthetic_fallback: bool,
    /// Provider ids to enable, with credentials pulled per provider
    pub enabled_providers: Vec<Provider>,
    /// Audiences accepted when verifying Apple identity tokens
    /// (service id and/or native bundle ids)
    pub apple_audiences: Vec<String>,
    /// Credentials for local standalone login. Both must be set for
    /// local login to accept anyone.
    pub local_username: Option<String>,
    pub local_password: Option<String>,
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let host = env_or("AUTHRELAY_HOST", "127.0.0.1");
        let port: u16 = env_or("AUTHRELAY_PORT", "8595")
            .parse()
            .context("AUTHRELAY_PORT is not a valid port number")?;

        let base_url = std::env::var("AUTHRELAY_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));
        let base_url = base_url.trim_end_matches('/').to_string();

        let jwt_secret = std::env::var("AUTHRELAY_JWT_SECRET")
            .context("AUTHRELAY_JWT_SECRET must be set (token signing secret)")?;
        if jwt_secret.len() < 32 {
            warn!("[Config] AUTHRELAY_JWT_SECRET is shorter than 32 bytes");
        }

        let environment = env_or("AUTHRELAY_ENV", "dev");
        let allow_synthetic_fallback = env_flag("AUTHRELAY_ALLOW_SYNTHETIC_FALLBACK");
        if allow_synthetic_fallback && environment == "production" {
            warn!("[Config] Synthetic user fallback is enabled in production");
        }

        let enabled_providers =
            parse_provider_list(&env_or("AUTHRELAY_ENABLED_PROVIDERS", ""));

        let apple_audiences = split_csv(&env_or("AUTHRELAY_APPLE_AUDIENCES", ""));

        let local_username = std::env::var("AUTHRELAY_LOCAL_USERNAME").ok();
        let local_password = std::env::var("AUTHRELAY_LOCAL_PASSWORD").ok();
        if enabled_providers.is_empty() && local_password.is_none() {
            warn!("[Config] No providers enabled and no local credentials set; nobody can log in");
        }

        Ok(Self {
            host,
            port,
            base_url,
            jwt_secret,
            environment,
            enable_cors: !env_flag("AUTHRELAY_DISABLE_CORS"),
            allow_synthetic_fallback,
            enabled_providers,
            apple_audiences,
            local_username,
            local_password,
        })
    }

    /// Get the socket address
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid bind address")
    }

    /// Production toggles Secure/SameSite cookie attributes.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// The gateway's own provider callback URL.
    pub fn callback_url(&self, provider: Provider) -> String {
        format!("{}/login/oauth2/code/{}", self.base_url, provider)
    }

    /// Build the provider registry from enabled providers and their
    /// per-provider credential variables.
    pub fn build_registry(&self) -> ProviderRegistry {
        let candidates = self
            .enabled_providers
            .iter()
            .map(|&provider| {
                let prefix = format!("AUTHRELAY_{}", provider.as_str().to_uppercase());
                ProviderConfig::well_known(
                    provider,
                    env_or(&format!("{}_CLIENT_ID", prefix), ""),
                    env_or(&format!("{}_CLIENT_SECRET", prefix), ""),
                    self.callback_url(provider),
                )
            })
            .collect();
        ProviderRegistry::new(candidates)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

/// Parse a comma-separated provider list, skipping unknown ids with a
/// warning instead of refusing to start.
fn parse_provider_list(raw: &str) -> Vec<Provider> {
    split_csv(raw)
        .iter()
        .filter_map(|id| match Provider::from_str(id) {
            Ok(p) => Some(p),
            Err(_) => {
                warn!("[Config] Ignoring unknown provider id: {}", id);
                None
            }
        })
        .collect()
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
