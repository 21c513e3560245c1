//! User records and the user store seam.
//!
//! Authentication produces a [`VerifiedIdentity`]; this module turns it
//! into a durable user record keyed by email. The store is a trait so
//! deployments can plug in a real database; the in-memory
//! implementation backs tests and standalone mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use authrelay_core::{Provider, VerifiedIdentity};

/// Default role for newly created users.
pub const DEFAULT_ROLE: &str = "REGULAR_USER";

/// Domain appended to bare local-login usernames.
const LOCAL_EMAIL_DOMAIN: &str = "local.test";

/// A stored user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable internal id, assigned on first sight of the email.
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub role: String,
    /// Provider that most recently authenticated this user.
    pub provider: Option<Provider>,
    pub created_at: DateTime<Utc>,
}

/// Persistence seam for users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create or update a user from a verified provider identity.
    /// The email is the identity key; profile fields are refreshed on
    /// every login.
    async fn upsert_identity(&self, identity: &VerifiedIdentity, email: &str) -> UserRecord;

    /// Create or update a user from a local login.
    async fn upsert_local(&self, email: &str) -> UserRecord;

    async fn find_by_email(&self, email: &str) -> Option<UserRecord>;
}

/// DashMap-backed store keyed by lowercased email.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, UserRecord>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(
        &self,
        email: &str,
        name: Option<String>,
        picture: Option<String>,
        provider: Option<Provider>,
    ) -> UserRecord {
        let key = email.to_ascii_lowercase();
        let mut entry = self.users.entry(key.clone()).or_insert_with(|| {
            info!("[Users] Creating user for {}", key);
            UserRecord {
                id: Uuid::new_v4().to_string(),
                email: key.clone(),
                name: None,
                picture: None,
                role: DEFAULT_ROLE.to_string(),
                provider: None,
                created_at: Utc::now(),
            }
        });

        // Refresh profile fields on every login, but never blank out
        // data a previous login provided.
        if name.is_some() {
            entry.name = name;
        }
        if picture.is_some() {
            entry.picture = picture;
        }
        if provider.is_some() {
            entry.provider = provider;
        }
        entry.clone()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn upsert_identity(&self, identity: &VerifiedIdentity, email: &str) -> UserRecord {
        let name = Some(identity.display_name()).filter(|n| !n.is_empty());
        self.upsert(email, name, identity.picture.clone(), Some(identity.provider))
    }

    async fn upsert_local(&self, email: &str) -> UserRecord {
        self.upsert(email, None, None, None)
    }

    async fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users.get(&email.to_ascii_lowercase()).map(|u| u.clone())
    }
}

/// Normalize a local-login username into an email address.
///
/// Full email addresses pass through lowercased; bare usernames get the
/// local test domain appended so every user record is email-keyed.
pub fn normalize_local_login(username: &str) -> String {
    let trimmed = username.trim();
    if trimmed.contains('@') {
        trimmed.to_ascii_lowercase()
    } else {
        format!("{}@{}", trimmed.to_ascii_lowercase(), LOCAL_EMAIL_DOMAIN)
    }
}
