//! Identity provider integration.
//!
//! This module implements the client side of the authorization-code flow
//! against a Keycloak-style identity provider:
//!
//! - **Session bootstrap** with the "login-required" policy, restoring
//!   persisted tokens or falling back to an interactive login
//! - **Transparent token refresh** inside a fixed lookahead window
//! - **Secure credential handling** via `secrecy::SecretString`
//! - **Safe logging** that never leaks tokens or sensitive URL parameters

pub mod auth;
pub mod client;
pub mod refresh;
pub mod session;

pub use client::{AuthedClient, LoggingMode, REFRESH_LOOKAHEAD};
pub use session::{IdentityAdapter, KeycloakAdapter, Session};
