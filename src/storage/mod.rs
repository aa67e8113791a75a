//! Durable client-side storage for the identity session's token entries.

pub mod tokens;

pub use tokens::{TokenPair, TokenStore, REFRESH_TOKEN_KEY, TOKEN_KEY};
