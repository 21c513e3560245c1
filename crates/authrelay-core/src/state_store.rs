//! Short-lived, single-use flow state.
//!
//! Two independent maps back the proxy flow: pending OAuth states
//! (created by `initiate`, read by the provider callback) and one-time
//! exchange codes (created by the callback, consumed exactly once by
//! `exchange`). Every entry carries its own expiry; reads treat an
//! expired entry as absent and delete it eagerly, and a periodic sweep
//! bounds memory for abandoned flows.
//!
//! The in-memory implementation is safe for concurrent request
//! handlers but NOT multi-instance safe: horizontal deployment
//! requires a shared implementation of [`StateStore`] (e.g. a
//! replicated cache) behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AuthError;
use crate::identity::VerifiedIdentity;
use crate::provider::Provider;

/// Reserved prefix tagging proxy-flow states. Both proxy and standard
/// OAuth flows funnel through the same provider callback URL; the
/// prefix is how the callback handler tells them apart.
pub const PROXY_STATE_PREFIX: &str = "oauth_proxy_";

/// Pending state and one-time code lifetime: 5 minutes.
pub const STATE_TTL_SECS: i64 = 300;

/// Sweep interval for expired entries: 5 minutes.
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// True iff the state carries the reserved proxy prefix.
pub fn is_proxy_state(state: &str) -> bool {
    state.starts_with(PROXY_STATE_PREFIX)
}

/// Generate a fresh proxy state token.
pub fn new_proxy_state() -> String {
    format!("{}{}", PROXY_STATE_PREFIX, Uuid::new_v4())
}

/// Generate a fresh one-time exchange code.
pub fn new_exchange_code() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Kind of client driving the proxied flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Web,
    Mobile,
    Desktop,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Web => "web",
            ClientType::Mobile => "mobile",
            ClientType::Desktop => "desktop",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "web" => Ok(ClientType::Web),
            "mobile" => Ok(ClientType::Mobile),
            "desktop" => Ok(ClientType::Desktop),
            other => Err(AuthError::InvalidRequest(format!(
                "unknown client_type: {}",
                other
            ))),
        }
    }
}

/// In-flight proxied OAuth flow.
///
/// Created by `initiate`; the only mutation afterwards is the one
/// `authorization_code` write when the provider callback arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOAuthState {
    pub state: String,
    pub provider: Provider,
    /// Caller-supplied redirect target; arbitrary scheme, including
    /// custom app schemes.
    pub caller_redirect_uri: String,
    pub client_type: ClientType,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub authorization_code: Option<String>,
}

impl PendingOAuthState {
    pub fn new(
        provider: Provider,
        caller_redirect_uri: String,
        client_type: ClientType,
        environment: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            state: new_proxy_state(),
            provider,
            caller_redirect_uri,
            client_type,
            environment,
            created_at: now,
            expires_at: now + Duration::seconds(STATE_TTL_SECS),
            authorization_code: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Payload stored under a one-time exchange code.
///
/// Either a fully authenticated identity (the framework-side exchange
/// completed during the callback) or a placeholder carrying just the
/// provider and raw authorization code, to be exchanged for real
/// identity data when the caller redeems the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExchangePayload {
    Identity(VerifiedIdentity),
    Placeholder {
        provider: Provider,
        authorization_code: String,
    },
}

/// What a one-time code redeems into: the payload plus the proxy
/// state it belongs to. `exchange` requires the caller to present the
/// matching state, so the code alone is not enough to finish a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeGrant {
    pub state: String,
    pub payload: ExchangePayload,
}

#[derive(Debug, Clone)]
struct CodeEntry {
    grant: ExchangeGrant,
    expires_at: DateTime<Utc>,
}

/// Injected key-value abstraction over flow state.
///
/// The orchestrator never hardwires a store type; tests and
/// single-instance deployments use [`InMemoryStateStore`], horizontal
/// deployments swap in a shared implementation.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a pending state under its own key.
    async fn put_state(&self, pending: PendingOAuthState);

    /// Read a pending state; expired entries behave as absent.
    async fn get_state(&self, state: &str) -> Option<PendingOAuthState>;

    /// Remove and return a pending state (single-use consumption).
    async fn take_state(&self, state: &str) -> Option<PendingOAuthState>;

    /// Record the provider's authorization code on an in-flight state.
    /// The one write a pending state ever receives after creation.
    async fn set_authorization_code(&self, state: &str, code: &str);

    /// Store an exchange grant under a one-time code with the
    /// standard TTL.
    async fn put_code(&self, code: &str, grant: ExchangeGrant);

    /// Remove and return a code's grant. Consumption is deliberately
    /// not idempotent: the second take of the same code returns `None`.
    async fn take_code(&self, code: &str) -> Option<ExchangeGrant>;

    /// Proactively drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

/// DashMap-backed store for tests and single-instance deployments.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, PendingOAuthState>,
    codes: DashMap<String, CodeEntry>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put_state(&self, pending: PendingOAuthState) {
        debug!(
            "[State] Storing pending state {} for provider {} ({} total)",
            pending.state,
            pending.provider,
            self.states.len() + 1
        );
        self.states.insert(pending.state.clone(), pending);
    }

    async fn get_state(&self, state: &str) -> Option<PendingOAuthState> {
        // Lazy expiry: an expired entry is absent even before the
        // sweep fires.
        if let Some(entry) = self.states.get(state) {
            if !entry.is_expired() {
                return Some(entry.clone());
            }
        }
        if self.states.remove(state).is_some() {
            debug!("[State] Dropped expired state on read: {}", state);
        }
        None
    }

    async fn take_state(&self, state: &str) -> Option<PendingOAuthState> {
        let (_, entry) = self.states.remove(state)?;
        if entry.is_expired() {
            debug!("[State] Dropped expired state on take: {}", state);
            return None;
        }
        Some(entry)
    }

    async fn set_authorization_code(&self, state: &str, code: &str) {
        if let Some(mut entry) = self.states.get_mut(state) {
            entry.authorization_code = Some(code.to_string());
        }
    }

    async fn put_code(&self, code: &str, grant: ExchangeGrant) {
        debug!(
            "[State] Storing exchange grant for code {}... ({} total)",
            &code[..code.len().min(8)],
            self.codes.len() + 1
        );
        self.codes.insert(
            code.to_string(),
            CodeEntry {
                grant,
                expires_at: Utc::now() + Duration::seconds(STATE_TTL_SECS),
            },
        );
    }

    async fn take_code(&self, code: &str) -> Option<ExchangeGrant> {
        let (_, entry) = self.codes.remove(code)?;
        if Utc::now() >= entry.expires_at {
            debug!("[State] Dropped expired code on take");
            return None;
        }
        Some(entry.grant)
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.states.len() + self.codes.len();
        self.states.retain(|_, v| now < v.expires_at);
        self.codes.retain(|_, v| now < v.expires_at);
        before - (self.states.len() + self.codes.len())
    }
}

/// Run the periodic expiry sweep on its own timer, independent of
/// request threads. Removal is idempotent, so racing the sweep against
/// lazy expiry-on-read is safe.
pub fn spawn_sweeper(store: Arc<dyn StateStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        // First tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                info!("[State] Sweep removed {} expired entries", removed);
            }
        }
    })
}
