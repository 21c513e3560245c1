//! Proxied OAuth flow orchestration.
//!
//! The proxy flow lets native and first-party clients run a provider
//! login through this gateway without embedding provider credentials:
//!
//! 1. `initiate` - client asks for a provider authorize URL; we mint a
//!    prefixed state, park the flow in the state store and hand back
//!    the URL.
//! 2. provider callback - the provider redirects to us; we record the
//!    authorization code on the pending state, mint a one-time
//!    exchange code and bounce the user to the client's own redirect
//!    URI. The state stays in the store until the final exchange.
//! 3. `exchange` - the client redeems the one-time code together with
//!    its state for a signed access/refresh token pair. Both entries
//!    are removed on the first attempt; a replay fails.
//!
//! Callbacks that arrive with an already-authenticated identity and
//! callbacks carrying only a raw provider code converge on the same
//! completion path, so the client always returns through its own
//! redirect URI.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use authrelay_core::{
    is_proxy_state, new_exchange_code, token, AuthError, ExchangeGrant, ExchangePayload,
    PendingOAuthState, Provider, ProviderConfig, ProviderRegistry, StateStore, TokenError,
    VerifiedIdentity, ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_TTL_SECS, STATE_TTL_SECS,
};

use super::apple::{merge_native_profile, AppleTokenVerifier};
use crate::users::{normalize_local_login, UserRecord, UserStore};

/// Access-token lifetime advertised on the wire. The signed claim
/// carries the real expiry; clients treat this as a refresh hint.
pub const ADVERTISED_EXPIRES_IN_SECS: i64 = 3600;

/// Signed token pair returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

/// Result of `initiate`: everything the client needs to start the
/// provider login.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyInitiation {
    pub auth_url: String,
    pub state: String,
    pub expires_in: i64,
}

/// Token endpoint response shape shared by all providers.
#[derive(Debug, Deserialize)]
struct ProviderTokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
}

/// One entry from GitHub's /user/emails endpoint.
#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Orchestrates the proxied OAuth flow end to end.
pub struct ProxyFlowService {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn StateStore>,
    users: Arc<dyn UserStore>,
    apple: Arc<AppleTokenVerifier>,
    http: reqwest::Client,
    jwt_secret: Vec<u8>,
    allow_synthetic_fallback: bool,
}

impl ProxyFlowService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn StateStore>,
        users: Arc<dyn UserStore>,
        apple: Arc<AppleTokenVerifier>,
        http: reqwest::Client,
        jwt_secret: Vec<u8>,
        allow_synthetic_fallback: bool,
    ) -> Self {
        Self {
            registry,
            store,
            users,
            apple,
            http,
            jwt_secret,
            allow_synthetic_fallback,
        }
    }

    /// Start a proxied flow: mint a state, store the pending flow and
    /// build the provider authorize URL.
    pub async fn initiate(
        &self,
        provider_id: &str,
        caller_redirect_uri: &str,
        client_type: &str,
        environment: &str,
    ) -> Result<ProxyInitiation, AuthError> {
        if caller_redirect_uri.trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "client_redirect_uri is required".to_string(),
            ));
        }
        let client_type = authrelay_core::ClientType::from_str(client_type)?;
        let config = self.registry.find_by_id(provider_id)?;

        let pending = PendingOAuthState::new(
            config.provider,
            caller_redirect_uri.to_string(),
            client_type,
            environment.to_string(),
        );
        let state = pending.state.clone();
        let auth_url = build_authorize_url(config, &state)?;
        self.store.put_state(pending).await;

        info!(
            "[OAuth] Initiated proxy flow for {} ({} client)",
            config.provider, client_type
        );
        Ok(ProxyInitiation {
            auth_url,
            state,
            expires_in: STATE_TTL_SECS,
        })
    }

    /// Complete a provider callback for a proxy-prefixed state.
    ///
    /// Both callback shapes resolve here: a payload that already
    /// carries a verified identity, or a placeholder holding the raw
    /// provider code for a deferred exchange. Either way a one-time
    /// exchange code is minted and the caller gets a redirect back to
    /// their own redirect URI. The pending state is NOT consumed; it
    /// must still be presented at `exchange`.
    pub async fn complete_proxy_flow(
        &self,
        state: &str,
        payload: ExchangePayload,
    ) -> Result<String, AuthError> {
        if !is_proxy_state(state) {
            return Err(AuthError::InvalidRequest(
                "state does not belong to a proxied flow".to_string(),
            ));
        }

        let pending = self
            .store
            .get_state(state)
            .await
            .ok_or_else(|| AuthError::InvalidGrant("Invalid or expired state".to_string()))?;

        if let ExchangePayload::Placeholder {
            provider,
            authorization_code,
        } = &payload
        {
            if *provider != pending.provider {
                return Err(AuthError::InvalidRequest(format!(
                    "callback provider {} does not match initiated flow",
                    provider
                )));
            }
            self.store
                .set_authorization_code(state, authorization_code)
                .await;
        }

        let exchange_code = new_exchange_code();
        self.store
            .put_code(
                &exchange_code,
                ExchangeGrant {
                    state: state.to_string(),
                    payload,
                },
            )
            .await;

        info!(
            "[OAuth] Callback for {} complete, issued exchange code",
            pending.provider
        );
        append_query(
            &pending.caller_redirect_uri,
            &[("code", &exchange_code), ("state", state)],
        )
    }

    /// Redeem a one-time exchange code plus its state for a signed
    /// token pair.
    ///
    /// The state is checked before the code so a caller holding a
    /// stolen code without its state learns nothing about whether the
    /// code exists. Both entries are removed on the first attempt,
    /// matching or not, so the same pair can never be redeemed twice.
    pub async fn exchange(&self, code: &str, state: &str) -> Result<TokenPair, AuthError> {
        if code.trim().is_empty() || state.trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "code and state are required".to_string(),
            ));
        }

        if self.store.get_state(state).await.is_none() {
            return Err(AuthError::InvalidGrant(
                "Invalid or expired state".to_string(),
            ));
        }

        let grant = self
            .store
            .take_code(code)
            .await
            .ok_or_else(|| AuthError::InvalidGrant("Invalid or expired code".to_string()))?;

        if grant.state != state {
            // Code is already burned at this point; that is deliberate.
            return Err(AuthError::InvalidGrant(
                "Invalid or expired code".to_string(),
            ));
        }

        self.store.take_state(state).await;

        let identity = match grant.payload {
            ExchangePayload::Identity(identity) => identity,
            ExchangePayload::Placeholder {
                provider,
                authorization_code,
            } => {
                match self
                    .exchange_authorization_code(provider, &authorization_code)
                    .await
                {
                    Ok(identity) => identity,
                    Err(e) if self.allow_synthetic_fallback => {
                        warn!(
                            "[OAuth] Real exchange with {} failed ({}), using synthetic identity",
                            provider, e
                        );
                        synthetic_identity(provider, &authorization_code)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let email = self.resolve_email(&identity)?;
        let user = self.users.upsert_identity(&identity, &email).await;

        info!(
            "[OAuth] Exchange complete for {} via {}",
            user.email, identity.provider
        );
        Ok(self.issue_pair(&user))
    }

    /// Complete a standard (framework-managed) browser login: the
    /// callback handler already matched the state against the
    /// authorization-request cookie, so all that remains is swapping
    /// the provider code for an identity and issuing tokens.
    pub async fn complete_standard_login(
        &self,
        provider: Provider,
        authorization_code: &str,
    ) -> Result<(TokenPair, UserRecord), AuthError> {
        let identity = self
            .exchange_authorization_code(provider, authorization_code)
            .await?;
        let email = self.resolve_email(&identity)?;
        let user = self.users.upsert_identity(&identity, &email).await;

        info!("[OAuth] Standard login for {} via {}", user.email, provider);
        Ok((self.issue_pair(&user), user))
    }

    /// Sign in with Apple from a native app: the client sends the raw
    /// id_token it got from the platform plus the one-shot profile
    /// fields Apple only delivers on first authorization. Returns the
    /// pair, the user and whether the address is a private relay alias.
    pub async fn apple_native(
        &self,
        identity_token: &str,
        email: Option<&str>,
        given_name: Option<&str>,
        family_name: Option<&str>,
    ) -> Result<(TokenPair, UserRecord, bool), AuthError> {
        let identity = self.apple.verify(identity_token).await?;
        let identity = merge_native_profile(identity, email, given_name, family_name);

        let email = self.resolve_email(&identity)?;
        let user = self.users.upsert_identity(&identity, &email).await;

        info!("[OAuth] Apple native sign-in for {}", user.email);
        Ok((self.issue_pair(&user), user, identity.is_private_email))
    }

    /// Local username/password-less login for standalone deployments.
    pub async fn local_login(&self, username: &str) -> Result<(TokenPair, UserRecord), AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "username is required".to_string(),
            ));
        }

        let email = normalize_local_login(username);
        let user = self.users.upsert_local(&email).await;

        info!("[Auth] Local login for {}", user.email);
        Ok((self.issue_pair(&user), user))
    }

    /// Rotate a refresh token into a fresh pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        if token::validate_refresh(refresh_token, &self.jwt_secret) {
            // Infallible here: validate_refresh just parsed it.
            let claims = token::validate(refresh_token, &self.jwt_secret)
                .map_err(|e| AuthError::ServerError(e.to_string()))?;

            let user = self
                .users
                .find_by_email(&claims.sub)
                .await
                .ok_or_else(|| AuthError::InvalidGrant("unknown user".to_string()))?;

            debug!("[Auth] Refreshed tokens for {}", user.email);
            return Ok(self.issue_pair(&user));
        }

        // Distinguish "expired" from "not a refresh token at all" so
        // clients know whether to re-authenticate.
        match token::claims_ignoring_expiry(refresh_token, &self.jwt_secret) {
            Ok(claims) if claims.is_refresh() => {
                Err(AuthError::InvalidGrant("refresh token expired".to_string()))
            }
            Ok(_) => Err(AuthError::InvalidGrant(
                "not a refresh token".to_string(),
            )),
            Err(TokenError::Empty) => {
                Err(AuthError::InvalidRequest("refresh_token is required".to_string()))
            }
            Err(e) => Err(AuthError::InvalidGrant(format!(
                "invalid refresh token: {}",
                e
            ))),
        }
    }

    fn issue_pair(&self, user: &UserRecord) -> TokenPair {
        TokenPair {
            access_token: token::issue_access_token(
                &user.email,
                &user.id,
                &self.jwt_secret,
                ACCESS_TOKEN_TTL_SECS,
            ),
            token_type: "Bearer".to_string(),
            expires_in: ADVERTISED_EXPIRES_IN_SECS,
            refresh_token: token::issue_refresh_token(
                &user.email,
                &user.id,
                &self.jwt_secret,
                REFRESH_TOKEN_TTL_SECS,
            ),
        }
    }

    /// Swap a provider authorization code for a verified identity.
    async fn exchange_authorization_code(
        &self,
        provider: Provider,
        authorization_code: &str,
    ) -> Result<VerifiedIdentity, AuthError> {
        let config = self
            .registry
            .find(provider)
            .ok_or_else(|| AuthError::InvalidProvider(provider.to_string()))?;

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", authorization_code.to_string()),
            ("redirect_uri", config.redirect_uri.clone()),
            ("client_id", config.client_id.clone()),
            ("client_secret", config.client_secret.clone()),
        ];
        // Microsoft's token endpoint rejects the exchange unless the
        // original scopes are repeated.
        if provider == Provider::Microsoft {
            form.push(("scope", config.scopes.join(" ")));
        }

        debug!("[OAuth] Exchanging authorization code with {}", provider);
        let response = self
            .http
            .post(&config.token_endpoint)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::ServerError(format!("token endpoint: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::ServerError(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let tokens: ProviderTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ServerError(format!("token response: {}", e)))?;

        if provider == Provider::Apple {
            let id_token = tokens.id_token.ok_or_else(|| {
                AuthError::AuthenticationFailed("apple returned no id_token".to_string())
            })?;
            return self.apple.verify(&id_token).await;
        }

        let access_token = tokens.access_token.ok_or_else(|| {
            AuthError::AuthenticationFailed("provider returned no access_token".to_string())
        })?;

        let mut identity = self.fetch_userinfo(config, &access_token).await?;

        // GitHub users can hide their email from the profile; the
        // dedicated emails endpoint still lists it.
        if identity.email.is_none() && config.emails_endpoint.is_some() {
            identity.email = self.github_email_fallback(config, &access_token).await;
            identity.email_verified = identity.email.is_some();
        }

        Ok(identity)
    }

    async fn fetch_userinfo(
        &self,
        config: &ProviderConfig,
        access_token: &str,
    ) -> Result<VerifiedIdentity, AuthError> {
        let attributes: Value = self
            .http
            .get(&config.userinfo_endpoint)
            .bearer_auth(access_token)
            // GitHub's API requires a User-Agent.
            .header("User-Agent", "authrelay-gateway")
            .send()
            .await
            .map_err(|e| AuthError::ServerError(format!("userinfo endpoint: {}", e)))?
            .error_for_status()
            .map_err(|e| AuthError::ServerError(format!("userinfo endpoint: {}", e)))?
            .json()
            .await
            .map_err(|e| AuthError::ServerError(format!("userinfo response: {}", e)))?;

        Ok(VerifiedIdentity::from_attributes(config.provider, attributes))
    }

    async fn github_email_fallback(
        &self,
        config: &ProviderConfig,
        access_token: &str,
    ) -> Option<String> {
        let emails: Vec<GithubEmail> = self
            .http
            .get(config.emails_endpoint.as_deref()?)
            .bearer_auth(access_token)
            .header("User-Agent", "authrelay-gateway")
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .json()
            .await
            .ok()?;

        pick_github_email(&emails)
    }

    fn resolve_email(&self, identity: &VerifiedIdentity) -> Result<String, AuthError> {
        if let Some(email) = &identity.email {
            return Ok(email.clone());
        }

        if self.allow_synthetic_fallback && !identity.subject.is_empty() {
            let synthetic = format!("{}_{}@synthetic.local", identity.provider, identity.subject);
            warn!("[OAuth] No email from provider, using synthetic {}", synthetic);
            return Ok(synthetic);
        }

        Err(AuthError::AuthenticationFailed(format!(
            "{} returned no email for this account",
            identity.provider
        )))
    }
}

/// Deterministic stand-in identity derived from the authorization
/// code, for deployments that opt into degraded operation when the
/// provider round trip fails. Same code, same identity.
fn synthetic_identity(provider: Provider, authorization_code: &str) -> VerifiedIdentity {
    let mut tag: String = authorization_code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(12)
        .collect();
    tag.make_ascii_lowercase();
    if tag.is_empty() {
        tag.push_str("user");
    }

    VerifiedIdentity::from_attributes(
        provider,
        serde_json::json!({
            "sub": format!("synthetic-{}", tag),
            "email": format!("{}_{}@synthetic.local", provider, tag),
            "email_verified": false,
        }),
    )
}

/// Primary verified address first, then any verified address.
fn pick_github_email(emails: &[GithubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

/// Provider authorize URL with the standard query parameters.
pub(crate) fn build_authorize_url(config: &ProviderConfig, state: &str) -> Result<String, AuthError> {
    let mut url = Url::parse(&config.authorization_endpoint)
        .map_err(|e| AuthError::ServerError(format!("bad authorization endpoint: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", state);

    // Apple requires form_post when name/email scopes are requested.
    if config.provider == Provider::Apple {
        url.query_pairs_mut()
            .append_pair("response_mode", "form_post");
    }

    Ok(url.to_string())
}

/// Append query parameters to the caller's redirect URI, preserving
/// any query it already carries. Custom app schemes are valid here.
fn append_query(redirect_uri: &str, params: &[(&str, &str)]) -> Result<String, AuthError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|_| AuthError::InvalidRequest("redirect_uri is not a valid URL".to_string()))?;
    for (key, value) in params {
        url.query_pairs_mut().append_pair(key, value);
    }
    Ok(url.to_string())
}
