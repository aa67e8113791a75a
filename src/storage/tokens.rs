//! Durable token storage keyed by fixed entry names.
//!
//! The session's tokens persist under the entry names `kc_token` and
//! `kc_refreshToken`, the same names a browser client would use in
//! `localStorage`. Here both entries live in a single JSON file. The file is replaced
//! atomically (write to a temporary file, then rename) so a crash mid-write
//! never leaves a truncated store behind. Tokens are never logged - the
//! `TokenPair` type implements a custom `Debug` that redacts all values.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Storage entry name for the access token.
pub const TOKEN_KEY: &str = "kc_token";

/// Storage entry name for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "kc_refreshToken";

/// Token pair for one identity session.
///
/// # Security
/// This type's `Debug` implementation redacts all token values to prevent
/// accidental logging of secrets.
#[derive(Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

/// Internal type for JSON serialization of the two named entries.
#[derive(Serialize, Deserialize)]
struct StoredEntries {
    #[serde(rename = "kc_token")]
    token: String,
    #[serde(rename = "kc_refreshToken")]
    refresh_token: String,
}

impl From<StoredEntries> for TokenPair {
    fn from(stored: StoredEntries) -> Self {
        TokenPair {
            access_token: stored.token,
            refresh_token: stored.refresh_token,
        }
    }
}

/// File-backed key-value store holding the session's token entries.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Creates a store backed by the given file path. The file is created on
    /// the first `store_tokens` call.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stores both token entries, overwriting any previous values.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the store file cannot be written.
    pub async fn store_tokens(&self, access: &str, refresh: &str) -> Result<(), AppError> {
        let stored = StoredEntries {
            token: access.to_string(),
            refresh_token: refresh.to_string(),
        };

        let json = serde_json::to_string_pretty(&stored)
            .map_err(|_| AppError::Internal("Failed to serialize tokens.".into()))?;

        // Atomic replace: write next to the target, then rename over it.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|_| AppError::Internal("Failed to write token store.".into()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|_| AppError::Internal("Failed to replace token store.".into()))
    }

    /// Retrieves the stored token pair.
    ///
    /// # Errors
    /// Returns `AppError::NotAuthenticated` if no entries exist.
    /// Returns `AppError::Internal` for other storage errors.
    pub async fn get_tokens(&self) -> Result<TokenPair, AppError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotAuthenticated)
            }
            Err(_) => return Err(AppError::Internal("Failed to read token store.".into())),
        };

        let stored: StoredEntries = serde_json::from_str(&json)
            .map_err(|_| AppError::Internal("Failed to parse stored tokens.".into()))?;

        Ok(stored.into())
    }

    /// Deletes both token entries.
    ///
    /// This operation is idempotent: deleting non-existent entries succeeds
    /// silently.
    ///
    /// # Errors
    /// Returns `AppError::Internal` for storage access errors.
    pub async fn delete_tokens(&self) -> Result<(), AppError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(_) => Err(AppError::Internal("Failed to delete token store.".into())),
        }
    }
}
