//! Identity session state and the session bootstrapper.
//!
//! A [`Session`] holds the access/refresh token pair and the authenticated
//! flag. The [`KeycloakAdapter`] owns the session and implements the
//! "login-required" bootstrap policy: restore persisted tokens if present,
//! validate them with an immediate refresh, and otherwise fall back to the
//! interactive login flow. Tokens are opaque strings; expiry is tracked from
//! the provider's `expires_in` answer, never by inspecting the token itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::{AdapterConfig, RealmUrls};
use crate::error::AppError;
use crate::keycloak::auth::{self, TokenResponse};
use crate::keycloak::client::build_http_client;
use crate::keycloak::refresh;
use crate::storage::TokenStore;

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// State of one identity session.
///
/// Sensitive fields are wrapped in `SecretString` to prevent accidental
/// exposure through `Debug` traits or logging.
pub struct Session {
    /// Current access token (opaque to the client).
    access_token: SecretString,
    /// Current refresh token (opaque to the client).
    refresh_token: SecretString,
    /// When the access token expires, if known. Restored tokens are of
    /// unknown age, so this starts out `None` and is treated as "refresh
    /// now".
    expires_at: Option<Instant>,
    /// Whether the session has been established against the provider.
    authenticated: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

impl Session {
    /// Creates an empty, unauthenticated session.
    pub fn unauthenticated() -> Self {
        Self {
            access_token: SecretString::from(String::new()),
            refresh_token: SecretString::from(String::new()),
            expires_at: None,
            authenticated: false,
        }
    }

    /// Creates a session from persisted tokens. The pair is of unknown age
    /// and validity, so the session stays unauthenticated until a refresh
    /// succeeds.
    fn restored(access: String, refresh: String) -> Self {
        Self {
            access_token: SecretString::from(access),
            refresh_token: SecretString::from(refresh),
            expires_at: None,
            authenticated: false,
        }
    }

    /// Applies a fresh token pair from the provider and marks the session
    /// authenticated. A missing rotated refresh token keeps the previous one.
    fn apply(&mut self, access: String, rotated_refresh: Option<String>, expires_in: Option<u64>) {
        self.access_token = SecretString::from(access);
        if let Some(refresh) = rotated_refresh {
            self.refresh_token = SecretString::from(refresh);
        }
        self.expires_at = expires_in.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.authenticated = true;
    }

    /// Clears all tokens and drops back to the unauthenticated state.
    fn clear(&mut self) {
        *self = Session::unauthenticated();
    }

    /// Whether the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether the access token expires within `lookahead` (or has unknown
    /// expiry, which counts as expired).
    pub fn expires_within(&self, lookahead: Duration) -> bool {
        match self.expires_at {
            Some(at) => at <= Instant::now() + lookahead,
            None => true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IdentityAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Contract surface of the identity client.
///
/// The request interceptor depends on this trait rather than on the concrete
/// adapter so it can be tested in isolation.
#[async_trait]
pub trait IdentityAdapter: Send + Sync {
    /// Attempts to establish a session from previously persisted tokens.
    ///
    /// Returns `true` if the session is authenticated afterwards, `false` if
    /// a login is required. Provider unreachability is an error: there is no
    /// session to establish and nothing to render.
    async fn initialize(&self) -> Result<bool, AppError>;

    /// Refreshes the session if the access token expires within `lookahead`.
    /// Returns `true` if a refresh happened.
    async fn refresh_if_needed(&self, lookahead: Duration) -> Result<bool, AppError>;

    /// Runs the interactive login flow and establishes a fresh session.
    async fn login(&self) -> Result<(), AppError>;

    /// Ends the session: tokens are cleared locally and removed from storage.
    async fn logout(&self) -> Result<(), AppError>;

    /// The current access token, if the session is authenticated.
    async fn access_token(&self) -> Option<SecretString>;

    /// Whether the session is currently authenticated.
    async fn is_authenticated(&self) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// KeycloakAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Identity adapter backed by a Keycloak-style provider.
///
/// # Thread Safety
///
/// - `session`: protected by `RwLock` allowing concurrent reads (requests)
///   but exclusive writes (refresh, login, logout).
/// - `refresh_lock`: `Mutex` to serialize refresh attempts so concurrent
///   requests cannot race a refresh.
pub struct KeycloakAdapter {
    http: reqwest::Client,
    config: AdapterConfig,
    urls: RealmUrls,
    store: TokenStore,
    session: Arc<RwLock<Session>>,
    refresh_lock: Arc<Mutex<()>>,
}

impl KeycloakAdapter {
    /// Creates an adapter for the given descriptor and token store.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigInvalid` for a malformed descriptor and
    /// `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(config: AdapterConfig, store: TokenStore) -> Result<Self, AppError> {
        let urls = config.realm_urls()?;
        let http = build_http_client()?;
        Ok(Self {
            http,
            config,
            urls,
            store,
            session: Arc::new(RwLock::new(Session::unauthenticated())),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Performs one refresh grant and propagates the result into the session
    /// and the token store.
    async fn do_refresh(&self) -> Result<(), AppError> {
        let refresh_token = {
            let session = self.session.read().await;
            let token = session.refresh_token.expose_secret().to_string();
            if token.is_empty() {
                return Err(AppError::NotAuthenticated);
            }
            SecretString::from(token)
        };

        let response = refresh::refresh_access_token(
            &self.http,
            self.urls.token_url(),
            &refresh_token,
            &self.config.resource,
        )
        .await?;

        let persisted_refresh = response
            .refresh_token
            .clone()
            .unwrap_or_else(|| refresh_token.expose_secret().to_string());

        {
            let mut session = self.session.write().await;
            session.apply(
                response.access_token.clone(),
                response.refresh_token,
                response.expires_in,
            );
        }

        self.store
            .store_tokens(&response.access_token, &persisted_refresh)
            .await?;

        info!("[KC] Token refresh complete, session updated");
        Ok(())
    }

    /// Applies a login token response: session state plus persisted entries.
    async fn apply_token_response(&self, response: TokenResponse) -> Result<(), AppError> {
        {
            let mut session = self.session.write().await;
            session.clear();
            session.apply(
                response.access_token.clone(),
                response.refresh_token.clone(),
                response.expires_in,
            );
        }

        if let Some(ref refresh) = response.refresh_token {
            self.store
                .store_tokens(&response.access_token, refresh)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl IdentityAdapter for KeycloakAdapter {
    async fn initialize(&self) -> Result<bool, AppError> {
        let pair = match self.store.get_tokens().await {
            Ok(pair) => pair,
            Err(AppError::NotAuthenticated) => {
                info!("[KC] No persisted tokens, login required");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        {
            let mut session = self.session.write().await;
            *session = Session::restored(pair.access_token, pair.refresh_token);
        }

        // Persisted tokens are opaque and of unknown age; the only way to
        // validate them is to refresh against the provider.
        match self.do_refresh().await {
            Ok(()) => {
                info!("[KC] Session restored from persisted tokens");
                Ok(true)
            }
            Err(AppError::SessionExpired) | Err(AppError::NotAuthenticated) => {
                warn!("[KC] Persisted tokens rejected, login required");
                self.store.delete_tokens().await?;
                self.session.write().await.clear();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_if_needed(&self, lookahead: Duration) -> Result<bool, AppError> {
        let _guard = self.refresh_lock.lock().await;

        // Check under the lock: a concurrent caller may have refreshed while
        // we were waiting.
        let needed = {
            let session = self.session.read().await;
            if !session.is_authenticated() {
                return Err(AppError::NotAuthenticated);
            }
            session.expires_within(lookahead)
        };

        if !needed {
            return Ok(false);
        }

        self.do_refresh().await?;
        Ok(true)
    }

    async fn login(&self) -> Result<(), AppError> {
        let response = auth::start_login_flow(&self.http, &self.config).await?;
        self.apply_token_response(response).await?;
        info!("[KC] Login successful");
        Ok(())
    }

    async fn logout(&self) -> Result<(), AppError> {
        // Best-effort end-session call; local state is cleared regardless.
        let mut url = self.urls.logout_url().clone();
        url.query_pairs_mut()
            .append_pair("redirect_uri", self.config.backend_url.as_str());

        if let Err(e) = self.http.get(url.as_str()).send().await {
            warn!("[KC] End-session request failed: {}", e);
        }

        self.store.delete_tokens().await?;
        self.session.write().await.clear();
        info!("[KC] Logged out, tokens cleared");
        Ok(())
    }

    async fn access_token(&self) -> Option<SecretString> {
        let session = self.session.read().await;
        if session.is_authenticated() {
            Some(session.access_token.clone())
        } else {
            None
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_authenticated()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_session_has_no_token_state() {
        let session = Session::unauthenticated();

        assert!(!session.is_authenticated());
        assert!(session.expires_within(Duration::from_secs(5)));
    }

    #[test]
    fn restored_session_counts_as_expired() {
        let session = Session::restored("access".into(), "refresh".into());

        // Unknown age: must be refreshed before use
        assert!(!session.is_authenticated());
        assert!(session.expires_within(Duration::from_secs(5)));
    }

    #[test]
    fn applied_tokens_respect_lookahead_window() {
        let mut session = Session::unauthenticated();

        session.apply("access".into(), Some("refresh".into()), Some(300));
        assert!(session.is_authenticated());
        assert!(!session.expires_within(Duration::from_secs(5)));

        session.apply("access".into(), Some("refresh".into()), Some(3));
        assert!(session.expires_within(Duration::from_secs(5)));
    }

    #[test]
    fn apply_without_rotation_keeps_refresh_token() {
        let mut session = Session::restored("access".into(), "original_refresh".into());

        session.apply("new_access".into(), None, Some(60));

        assert_eq!(session.refresh_token.expose_secret(), "original_refresh");
        assert_eq!(session.access_token.expose_secret(), "new_access");
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = Session::restored("secret_access_123".into(), "secret_refresh_456".into());

        let debug_output = format!("{:?}", session);

        assert!(!debug_output.contains("secret_access_123"));
        assert!(!debug_output.contains("secret_refresh_456"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
