//! The protected greeting resource and its rendering.
//!
//! Fetches `GET /hello` from the backend through the authenticated client
//! and renders the outcome as the single user-facing message. Rendering
//! never panics: an error renders its description in the same frame a
//! success would render the greeting.

use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::keycloak::AuthedClient;

/// Fetches the greeting from the backend's `/hello` resource.
///
/// # Errors
///
/// - `AppError::BackendError` - The backend answered with a non-success status
/// - `AppError::LoginRequired` - The session could not be refreshed; a fresh
///   login was started and this request was abandoned
/// - `AppError::ConnectionFailed` - The backend is unreachable
pub async fn fetch_greeting(client: &AuthedClient, backend_url: &Url) -> Result<String, AppError> {
    let url = backend_url
        .join("hello")
        .map_err(|_| AppError::ConfigInvalid(format!("invalid backend-url: {}", backend_url)))?;

    let response = client.get(url).await?;
    let status = response.status();

    if !status.is_success() {
        return Err(AppError::BackendError(format!(
            "request failed with status {}",
            status.as_u16()
        )));
    }

    let greeting = response
        .text()
        .await
        .map_err(|_| AppError::Internal("Failed to read greeting body".to_string()))?;

    info!("[KC] Greeting received");
    Ok(greeting)
}

/// Renders the greeting outcome as the user-facing message.
///
/// Success and failure share the same frame; an error shows its description
/// where the greeting would go.
pub fn render_message(outcome: &Result<String, AppError>) -> String {
    match outcome {
        Ok(greeting) => format!("Server says: {} !", greeting),
        Err(err) => format!("Server says: {} !", err),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_message_wraps_greeting() {
        let outcome = Ok("Hello User123".to_string());
        assert_eq!(render_message(&outcome), "Server says: Hello User123 !");
    }

    #[test]
    fn render_message_shows_error_description() {
        let outcome: Result<String, AppError> = Err(AppError::BackendError(
            "request failed with status 500".to_string(),
        ));

        assert_eq!(
            render_message(&outcome),
            "Server says: Backend error: request failed with status 500 !"
        );
    }

    #[test]
    fn render_message_never_panics_on_any_variant() {
        let outcomes: Vec<Result<String, AppError>> = vec![
            Err(AppError::NotAuthenticated),
            Err(AppError::SessionExpired),
            Err(AppError::LoginRequired),
            Err(AppError::ConnectionFailed("backend unreachable".into())),
        ];

        for outcome in &outcomes {
            let message = render_message(outcome);
            assert!(message.starts_with("Server says: "));
            assert!(message.ends_with(" !"));
        }
    }
}
