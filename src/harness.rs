//! Out-of-band login/logout commands for end-to-end tests.
//!
//! Mock identity providers expose an `/authenticate` route at the server
//! root that skips the login page entirely: the caller names the user and
//! roles in the query string and receives the authorization-code redirect
//! directly. This module drives that route programmatically so tests can
//! establish or tear down a session without a browser.

use reqwest::redirect;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::config::RealmUrls;
use crate::error::AppError;
use crate::keycloak::auth::generate_state;
use crate::storage::{TokenPair, TokenStore};

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Inputs for one out-of-band login.
pub struct LoginParams<'a> {
    /// Identity provider root, including its context path.
    pub root: &'a Url,
    /// Realm name.
    pub realm: &'a str,
    /// Username to authenticate as.
    pub username: &'a str,
    /// Password field; mock providers read the requested roles from it.
    pub password: &'a str,
    /// OAuth client ID.
    pub client_id: &'a str,
    /// Redirect URI registered for the client.
    pub redirect_uri: &'a str,
}

/// Token endpoint answer for the harness's code exchange.
#[derive(Debug, Deserialize)]
struct HarnessTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Login
// ─────────────────────────────────────────────────────────────────────────────

/// Logs in through the provider's out-of-band authentication route and
/// persists the resulting token pair.
///
/// The authorization code arrives in a redirect that must NOT be followed;
/// this function uses its own non-redirecting HTTP client.
///
/// # Errors
///
/// - `AppError::OAuthError` - The provider did not answer with a valid
///   redirect, the state did not round-trip, or the code exchange failed
/// - `AppError::ConnectionFailed` - The provider is unreachable
pub async fn login(store: &TokenStore, params: &LoginParams<'_>) -> Result<TokenPair, AppError> {
    let urls = RealmUrls::new(params.root, params.realm)?;
    let state = generate_state();
    let nonce = generate_state();
    let session_id = generate_state();

    let mut authenticate = urls.authenticate_url().clone();
    authenticate
        .query_pairs_mut()
        .append_pair("realm", params.realm)
        .append_pair("client_id", params.client_id)
        .append_pair("redirect_uri", params.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("state", &state)
        .append_pair("nonce", &nonce)
        .append_pair("session_id", &session_id)
        .append_pair("user", params.username)
        .append_pair("roles", params.password);

    let http = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

    info!("[KC] Harness login as '{}'", params.username);

    let response = http
        .get(authenticate.as_str())
        .send()
        .await
        .map_err(|_| AppError::ConnectionFailed("Failed to reach identity provider".into()))?;

    if !response.status().is_redirection() {
        return Err(AppError::OAuthError(format!(
            "Authentication route answered {} instead of a redirect",
            response.status().as_u16()
        )));
    }

    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::OAuthError("Redirect without Location header".into()))?;

    let code = parse_redirect_location(location, &state)?;

    let exchange_params = [
        ("grant_type", "authorization_code"),
        ("client_id", params.client_id),
        ("code", &code),
        ("redirect_uri", params.redirect_uri),
    ];

    let token_response = http
        .post(urls.token_url().as_str())
        .form(&exchange_params)
        .send()
        .await
        .map_err(|_| AppError::ConnectionFailed("Failed to connect for token exchange".into()))?;

    if !token_response.status().is_success() {
        return Err(AppError::OAuthError("Token exchange failed".into()));
    }

    let tokens: HarnessTokenResponse = token_response
        .json()
        .await
        .map_err(|_| AppError::OAuthError("Invalid token response".into()))?;

    let refresh_token = tokens
        .refresh_token
        .ok_or_else(|| AppError::OAuthError("Provider issued no refresh token".into()))?;

    store
        .store_tokens(&tokens.access_token, &refresh_token)
        .await?;

    info!("[KC] Harness login complete, tokens persisted");

    Ok(TokenPair {
        access_token: tokens.access_token,
        refresh_token,
    })
}

/// Extracts the authorization code from the redirect `Location` value,
/// validating that the state round-tripped.
fn parse_redirect_location(location: &str, expected_state: &str) -> Result<String, AppError> {
    let url = Url::parse(location)
        .map_err(|_| AppError::OAuthError("Redirect Location is not a valid URL".into()))?;

    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            _ => {}
        }
    }

    let state = state.ok_or_else(|| AppError::OAuthError("Redirect without state".into()))?;
    if state != expected_state {
        return Err(AppError::OAuthError("State validation failed".into()));
    }

    code.ok_or_else(|| AppError::OAuthError("Redirect without authorization code".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Logout
// ─────────────────────────────────────────────────────────────────────────────

/// Ends the provider session and removes the persisted token entries.
///
/// # Errors
///
/// Returns `AppError::ConnectionFailed` if the provider is unreachable;
/// storage errors propagate as `AppError::Internal`.
pub async fn logout(
    store: &TokenStore,
    root: &Url,
    realm: &str,
    redirect_uri: &str,
) -> Result<(), AppError> {
    let urls = RealmUrls::new(root, realm)?;

    let mut logout_url = urls.logout_url().clone();
    logout_url
        .query_pairs_mut()
        .append_pair("redirect_uri", redirect_uri);

    let http = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

    http.get(logout_url.as_str())
        .send()
        .await
        .map_err(|_| AppError::ConnectionFailed("Failed to reach identity provider".into()))?;

    store.delete_tokens().await?;
    info!("[KC] Harness logout complete, tokens removed");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_redirect_extracts_code() {
        let location = "http://localhost:3000/?state=expected&session_state=sess-1&code=sid-42";

        let code = parse_redirect_location(location, "expected").unwrap();
        assert_eq!(code, "sid-42");
    }

    #[test]
    fn parse_redirect_rejects_state_mismatch() {
        let location = "http://localhost:3000/?state=tampered&code=sid-42";

        let result = parse_redirect_location(location, "expected");
        assert!(matches!(result, Err(AppError::OAuthError(_))));
    }

    #[test]
    fn parse_redirect_rejects_missing_code() {
        let location = "http://localhost:3000/?state=expected";

        let result = parse_redirect_location(location, "expected");
        assert!(matches!(result, Err(AppError::OAuthError(_))));
    }

    #[test]
    fn parse_redirect_rejects_missing_state() {
        let location = "http://localhost:3000/?code=sid-42";

        let result = parse_redirect_location(location, "expected");
        assert!(matches!(result, Err(AppError::OAuthError(_))));
    }

    #[test]
    fn parse_redirect_rejects_garbage_location() {
        let result = parse_redirect_location("not a url", "expected");
        assert!(matches!(result, Err(AppError::OAuthError(_))));
    }
}
