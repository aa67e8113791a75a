//! Keycloak-protected "hello" client.
//!
//! A minimal OpenID Connect client application: it establishes an identity
//! session with a Keycloak-style provider under the "login-required" policy,
//! keeps the access token fresh ahead of every request, and fetches a
//! greeting from a bearer-protected backend.
//!
//! # Architecture
//!
//! - [`config`] - Adapter descriptor (`keycloak.json` shape) and realm URLs
//! - [`error`] - Application error type with sanitized presentation
//! - [`storage`] - Durable token entries under `kc_token` / `kc_refreshToken`
//! - [`keycloak`] - Session bootstrap, token refresh, authenticated client
//! - [`hello`] - The protected greeting resource and its rendering
//! - [`harness`] - Out-of-band login/logout commands for end-to-end tests

pub mod config;
pub mod error;
pub mod harness;
pub mod hello;
pub mod keycloak;
pub mod storage;
