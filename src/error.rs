use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    SessionExpired,

    /// The identity session could not be refreshed; a fresh login was
    /// triggered and the original request was abandoned.
    #[error("Login required")]
    LoginRequired,

    #[error("OAuth error: {0}")]
    OAuthError(String),

    #[error("Failed to bind OAuth callback port")]
    PortBindFailed,

    // ── Backend ───────────────────────────────────────────────────────────────
    #[error("Backend error: {0}")]
    BackendError(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid adapter configuration: {0}")]
    ConfigInvalid(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Auth ──────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "You need to log in to continue.".into(),
                action: Some("Log in".into()),
            },

            AppError::SessionExpired => ErrorPresentation {
                title: "Session Expired".into(),
                message: "Your session has expired.".into(),
                action: Some("Log in again".into()),
            },

            AppError::LoginRequired => ErrorPresentation {
                title: "Login Required".into(),
                message: "Your session could not be refreshed, so a new login was started."
                    .into(),
                action: Some("Complete the login and retry".into()),
            },

            AppError::OAuthError(_) => ErrorPresentation {
                title: "Login Failed".into(),
                message: "Could not complete the login process. Please try again.".into(),
                action: Some("Try logging in again".into()),
            },

            AppError::PortBindFailed => ErrorPresentation {
                title: "Login Unavailable".into(),
                message: "Could not start the login process. Another application may be using the required port.".into(),
                action: Some("Close other applications and try again".into()),
            },

            // ── Backend ───────────────────────────────────────────────────────
            AppError::BackendError(msg) => ErrorPresentation {
                title: "Backend Error".into(),
                message: sanitize_message(msg, "The backend request failed."),
                action: None,
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to the server. Please check your network connection.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::ConfigInvalid(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: format!("The adapter configuration is invalid: {}", msg),
                action: Some("Fix the configuration file".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}
