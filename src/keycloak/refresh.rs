//! Token refresh against the realm's token endpoint.
//!
//! Handles exchanging a refresh token for a new access token without
//! requiring user interaction.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the refresh-token grant.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    /// The new access token.
    pub access_token: String,
    /// Rotated refresh token, if the provider issues one.
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Token type (usually "Bearer").
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Refresh
// ─────────────────────────────────────────────────────────────────────────────

/// Refreshes an access token using a refresh token.
///
/// # Arguments
///
/// * `http` - The HTTP client to use
/// * `token_url` - The realm's token endpoint
/// * `refresh_token` - The refresh token from the original login
/// * `client_id` - The OAuth client ID
///
/// # Errors
///
/// - `AppError::SessionExpired` - The refresh token is invalid or expired
/// - `AppError::ConnectionFailed` - Network error during refresh
///
/// # Security
///
/// This function never logs the refresh token or the new access token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &Url,
    refresh_token: &SecretString,
    client_id: &str,
) -> Result<RefreshResponse, AppError> {
    info!("[KC] Refreshing access token...");

    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token.expose_secret()),
    ];

    let response = http
        .post(token_url.as_str())
        .form(&params)
        .send()
        .await
        .map_err(|_| {
            error!("[KC] Token refresh request failed");
            AppError::ConnectionFailed("Failed to connect for token refresh".to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let refresh_response: RefreshResponse = response.json().await.map_err(|_| {
            error!("[KC] Failed to parse token refresh response");
            AppError::Internal("Invalid token refresh response".to_string())
        })?;

        info!("[KC] Token refresh successful");
        Ok(refresh_response)
    } else if status == reqwest::StatusCode::BAD_REQUEST
        || status == reqwest::StatusCode::UNAUTHORIZED
    {
        // Refresh token is invalid or expired
        error!("[KC] Token refresh failed: {}", status);
        Err(AppError::SessionExpired)
    } else {
        error!("[KC] Token refresh failed with status: {}", status);
        Err(AppError::OAuthError("Token refresh failed".to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
