//! OAuth provider registry.
//!
//! Maps a provider id to its OAuth endpoints, client credentials and
//! scopes, plus a per-provider claim-mapping table for extracting
//! identity fields out of userinfo payloads. Providers are enabled
//! declaratively; an empty enable-list means local standalone mode.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::AuthError;

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    GitHub,
    Apple,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::GitHub => "github",
            Provider::Apple => "apple",
        }
    }

    pub const ALL: [Provider; 4] = [
        Provider::Google,
        Provider::Microsoft,
        Provider::GitHub,
        Provider::Apple,
    ];
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            "github" => Ok(Provider::GitHub),
            "apple" => Ok(Provider::Apple),
            other => Err(AuthError::InvalidProvider(other.to_string())),
        }
    }
}

/// OAuth endpoints and credentials for one enabled provider.
///
/// `redirect_uri` is the server's own fixed callback, never the
/// caller's.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    /// Secondary endpoint listing the account's email addresses, for
    /// providers that omit the email from the profile (GitHub).
    pub emails_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
}

impl ProviderConfig {
    /// Well-known endpoints for the given provider; credentials and
    /// redirect URI come from configuration.
    pub fn well_known(
        provider: Provider,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        let (authorization_endpoint, token_endpoint, userinfo_endpoint, jwks_uri, scopes) =
            match provider {
                Provider::Google => (
                    "https://accounts.google.com/o/oauth2/v2/auth",
                    "https://oauth2.googleapis.com/token",
                    "https://openidconnect.googleapis.com/v1/userinfo",
                    Some("https://www.googleapis.com/oauth2/v3/certs"),
                    vec!["openid", "profile", "email"],
                ),
                Provider::Microsoft => (
                    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                    "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                    "https://graph.microsoft.com/v1.0/me",
                    None,
                    vec!["openid", "profile", "email", "User.Read"],
                ),
                Provider::GitHub => (
                    "https://github.com/login/oauth/authorize",
                    "https://github.com/login/oauth/access_token",
                    "https://api.github.com/user",
                    None,
                    vec!["read:user", "user:email"],
                ),
                Provider::Apple => (
                    "https://appleid.apple.com/auth/authorize",
                    "https://appleid.apple.com/auth/token",
                    // Apple has no userinfo endpoint; identity comes from
                    // the id_token.
                    "https://appleid.apple.com/auth/token",
                    Some("https://appleid.apple.com/auth/keys"),
                    vec!["name", "email"],
                ),
            };

        let emails_endpoint = match provider {
            Provider::GitHub => Some("https://api.github.com/user/emails".to_string()),
            _ => None,
        };

        Self {
            provider,
            authorization_endpoint: authorization_endpoint.to_string(),
            token_endpoint: token_endpoint.to_string(),
            userinfo_endpoint: userinfo_endpoint.to_string(),
            emails_endpoint,
            jwks_uri: jwks_uri.map(String::from),
            client_id,
            client_secret,
            scopes: scopes.into_iter().map(String::from).collect(),
            redirect_uri,
        }
    }

    /// Placeholder credentials must not activate a provider.
    pub fn has_real_credentials(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_id.starts_with("your-")
            && !self.client_id.starts_with("changeme")
            && !self.client_secret.is_empty()
    }
}

/// Where to find an identity field in a provider's userinfo payload.
///
/// Each list is a fallback chain tried in order; open for extension
/// without touching a central conditional.
#[derive(Debug, Clone)]
pub struct ClaimMapping {
    pub subject_fields: &'static [&'static str],
    pub email_fields: &'static [&'static str],
    pub name_fields: &'static [&'static str],
    pub given_name_fields: &'static [&'static str],
    pub family_name_fields: &'static [&'static str],
    pub picture_fields: &'static [&'static str],
}

impl ClaimMapping {
    pub fn for_provider(provider: Provider) -> &'static ClaimMapping {
        match provider {
            Provider::Google => &GOOGLE_CLAIMS,
            Provider::Microsoft => &MICROSOFT_CLAIMS,
            Provider::GitHub => &GITHUB_CLAIMS,
            Provider::Apple => &APPLE_CLAIMS,
        }
    }
}

static GOOGLE_CLAIMS: ClaimMapping = ClaimMapping {
    subject_fields: &["sub"],
    email_fields: &["email"],
    name_fields: &["name"],
    given_name_fields: &["given_name"],
    family_name_fields: &["family_name"],
    picture_fields: &["picture"],
};

// Microsoft Graph returns email and names under several different
// fields depending on account type; try each in order.
static MICROSOFT_CLAIMS: ClaimMapping = ClaimMapping {
    subject_fields: &["id", "sub"],
    email_fields: &["mail", "email", "userPrincipalName", "preferred_username"],
    name_fields: &["displayName", "name"],
    given_name_fields: &["givenName", "given_name"],
    family_name_fields: &["surname", "family_name"],
    picture_fields: &["picture"],
};

// GitHub does not expose given/family names.
static GITHUB_CLAIMS: ClaimMapping = ClaimMapping {
    subject_fields: &["id"],
    email_fields: &["email"],
    name_fields: &["name"],
    given_name_fields: &[],
    family_name_fields: &[],
    picture_fields: &["avatar_url"],
};

static APPLE_CLAIMS: ClaimMapping = ClaimMapping {
    subject_fields: &["sub"],
    email_fields: &["email"],
    name_fields: &["name"],
    given_name_fields: &[],
    family_name_fields: &[],
    picture_fields: &[],
};

/// Registry of enabled providers.
pub struct ProviderRegistry {
    providers: HashMap<Provider, ProviderConfig>,
}

impl ProviderRegistry {
    /// Build a registry from candidate configs, skipping entries with
    /// placeholder credentials.
    pub fn new(candidates: Vec<ProviderConfig>) -> Self {
        let mut providers = HashMap::new();
        for config in candidates {
            if !config.has_real_credentials() {
                warn!(
                    "[Registry] Skipping provider {} (placeholder or empty credentials)",
                    config.provider
                );
                continue;
            }
            info!("[Registry] Enabled provider: {}", config.provider);
            providers.insert(config.provider, config);
        }
        Self { providers }
    }

    /// Empty registry: local standalone mode, username/password only.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn find(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.providers.get(&provider)
    }

    /// Resolve a raw provider id string to an enabled config.
    pub fn find_by_id(&self, id: &str) -> Result<&ProviderConfig, AuthError> {
        let provider = Provider::from_str(id)?;
        self.providers
            .get(&provider)
            .ok_or_else(|| AuthError::InvalidProvider(id.to_string()))
    }

    pub fn enabled(&self) -> Vec<Provider> {
        let mut list: Vec<Provider> = self.providers.keys().copied().collect();
        list.sort_by_key(|p| p.as_str());
        list
    }

    /// No external providers configured: only local username/password
    /// login is available.
    pub fn is_local_standalone(&self) -> bool {
        self.providers.is_empty()
    }
}
