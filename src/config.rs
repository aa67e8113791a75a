//! Adapter configuration loaded from a client-side JSON descriptor.
//!
//! The descriptor follows the shape of a Keycloak `keycloak.json` file:
//! `auth-server-url`, `realm` and `resource` (the client ID), extended with
//! the protected backend's base URL and the token store location.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::AppError;

/// Default location of the persisted token entries, relative to the working
/// directory.
const DEFAULT_TOKEN_STORE: &str = "kc_tokens.json";

// ─────────────────────────────────────────────────────────────────────────────
// AdapterConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Client-side identity provider descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Identity provider root, including its context path
    /// (e.g., "http://localhost:8000/auth").
    #[serde(rename = "auth-server-url")]
    pub auth_server_url: Url,

    /// Realm name.
    pub realm: String,

    /// Client ID; Keycloak descriptors call this `resource`.
    pub resource: String,

    /// Base URL of the protected backend.
    #[serde(rename = "backend-url")]
    pub backend_url: Url,

    /// Path of the durable token storage file.
    #[serde(rename = "token-store", default = "default_token_store")]
    pub token_store: PathBuf,
}

fn default_token_store() -> PathBuf {
    PathBuf::from(DEFAULT_TOKEN_STORE)
}

impl AdapterConfig {
    /// Loads the descriptor from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigInvalid` if the file cannot be read or does
    /// not parse. This is fatal from the application's perspective: without a
    /// valid descriptor there is no identity session and nothing to render.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&raw)
            .map_err(|e| AppError::ConfigInvalid(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Derives the realm endpoint URLs from this descriptor.
    pub fn realm_urls(&self) -> Result<RealmUrls, AppError> {
        RealmUrls::new(&self.auth_server_url, &self.realm)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RealmUrls
// ─────────────────────────────────────────────────────────────────────────────

/// Resolved identity provider endpoints for one realm.
#[derive(Debug, Clone)]
pub struct RealmUrls {
    auth: Url,
    token: Url,
    logout: Url,
    authenticate: Url,
}

impl RealmUrls {
    /// Builds the endpoint set for `root` (including the provider's context
    /// path) and `realm`.
    pub fn new(root: &Url, realm: &str) -> Result<Self, AppError> {
        let base = root.as_str().trim_end_matches('/');

        let endpoint = |leaf: &str| -> Result<Url, AppError> {
            Url::parse(&format!(
                "{}/realms/{}/protocol/openid-connect/{}",
                base, realm, leaf
            ))
            .map_err(|_| AppError::ConfigInvalid(format!("invalid auth-server-url: {}", root)))
        };

        // The mock's out-of-band authentication route lives at the server
        // root, outside the realm path.
        let mut authenticate = root.clone();
        authenticate.set_path("/authenticate");
        authenticate.set_query(None);

        Ok(Self {
            auth: endpoint("auth")?,
            token: endpoint("token")?,
            logout: endpoint("logout")?,
            authenticate,
        })
    }

    /// Authorization endpoint (renders the provider's login page).
    pub fn auth_url(&self) -> &Url {
        &self.auth
    }

    /// Token endpoint (code exchange and refresh grants).
    pub fn token_url(&self) -> &Url {
        &self.token
    }

    /// End-session endpoint.
    pub fn logout_url(&self) -> &Url {
        &self.logout
    }

    /// Out-of-band authentication endpoint used by the test harness.
    pub fn authenticate_url(&self) -> &Url {
        &self.authenticate
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
