//! Authenticated HTTP client with pre-request token refresh and safe logging.
//!
//! Every outgoing request first asks the identity adapter to refresh the
//! session if the access token expires within [`REFRESH_LOOKAHEAD`]. Only
//! after that check resolves is the request transmitted with the current
//! bearer token. If the refresh fails the request is abandoned and a fresh
//! login is forced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use secrecy::ExposeSecret;
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::keycloak::session::IdentityAdapter;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// How close to expiry the access token may get before it is refreshed
/// ahead of a request.
pub const REFRESH_LOOKAHEAD: Duration = Duration::from_secs(5);

/// User agent string for all backend requests.
const CLIENT_USER_AGENT: &str = "kc-hello/0.1.0";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "code",
    "token",
    "id_token",
    "session_state",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/hello`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/hello?code=***&lang=en`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// # Security
///
/// This function uses the `url` crate for proper URL parsing rather than
/// regex-based string manipulation, ensuring robust handling of edge cases.
///
/// # Returns
///
/// A string safe for logging that never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AuthedClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client that keeps the session fresh before every request.
///
/// The client never retries a request around an expired token: freshness is
/// ensured up front by the lookahead refresh, and a failed refresh abandons
/// the request in favor of a new login.
#[derive(Clone)]
pub struct AuthedClient {
    /// The underlying HTTP client.
    http: reqwest::Client,
    /// Session authority: refresh, login, and token access go through here.
    adapter: Arc<dyn IdentityAdapter>,
    /// Controls URL sanitization for logging.
    logging_mode: LoggingMode,
}

impl AuthedClient {
    /// Creates a client around the given identity adapter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(adapter: Arc<dyn IdentityAdapter>) -> Result<Self, AppError> {
        let http = build_http_client()?;
        Ok(Self {
            http,
            adapter,
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Executes an authenticated GET request.
    ///
    /// # Errors
    ///
    /// See [`AuthedClient::request`].
    pub async fn get(&self, url: Url) -> Result<reqwest::Response, AppError> {
        self.request(Method::GET, url, None).await
    }

    /// Executes an authenticated request.
    ///
    /// The token refresh check must resolve before the request is
    /// transmitted; a request never leaves with a token known to be inside
    /// the expiry window.
    ///
    /// # Arguments
    ///
    /// * `method` - The HTTP method (GET, POST, etc.)
    /// * `url` - The absolute URL to request
    /// * `body` - Optional JSON request body
    ///
    /// # Errors
    ///
    /// - `AppError::LoginRequired` - The refresh failed; a fresh login was
    ///   started and the request was abandoned
    /// - `AppError::NotAuthenticated` - No session is established
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, AppError> {
        if let Err(err) = self.adapter.refresh_if_needed(REFRESH_LOOKAHEAD).await {
            warn!("[KC] Pre-request refresh failed ({}), forcing re-login", err);
            self.adapter.login().await?;
            return Err(AppError::LoginRequired);
        }

        let token = self
            .adapter
            .access_token()
            .await
            .ok_or(AppError::NotAuthenticated)?;

        self.execute_authed_request(method, url, body, token.expose_secret())
            .await
    }

    /// Executes a single authenticated request with timing and logging.
    ///
    /// # Security
    ///
    /// - Never logs the Authorization header
    /// - Never logs request/response bodies
    /// - Sanitizes URLs before logging
    /// - Error messages never contain raw URLs or tokens
    async fn execute_authed_request(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        access_token: &str,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self.http.request(method.clone(), url.as_str());
        request = request.bearer_auth(access_token);

        if let Some(body_bytes) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body_bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status = response.status();
                info!(
                    "[KC] {} {} {} {}ms",
                    method,
                    sanitized_url,
                    status.as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(_) => {
                // The raw reqwest error may contain the full URL
                info!("[KC] {} {} FAILED {}ms", method, sanitized_url, duration_ms);
                Err(AppError::ConnectionFailed(
                    "Connection to backend failed".to_string(),
                ))
            }
        }
    }
}

/// Builds the configured HTTP client.
pub(crate) fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ─────────────────────────────────────────────────────────────────────────
    // URL Sanitization Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn sanitize_strips_scheme_and_host() {
        let url = Url::parse("http://localhost:8080/hello").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/hello");
        assert!(!result.contains("http"));
        assert!(!result.contains("localhost"));
    }

    #[test]
    fn sanitize_strips_fragment() {
        let url = Url::parse("http://example.com/path?safe=value#secret-anchor").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);
        assert!(!result.contains("#"));
        assert!(!result.contains("secret-anchor"));
        assert_eq!(result, "/path");

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);
        assert!(!result.contains("#"));
        assert!(!result.contains("secret-anchor"));
        assert!(result.contains("safe=value"));
    }

    #[test]
    fn path_only_excludes_query_string() {
        let url = Url::parse(
            "http://localhost:8000/auth/realms/realm/protocol/openid-connect/token?code=secret&state=abc",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/auth/realms/realm/protocol/openid-connect/token");
        assert!(!result.contains("?"));
        assert!(!result.contains("secret"));
    }

    #[test]
    fn path_and_query_redacted_redacts_sensitive_keys() {
        let test_cases = [
            ("access_token", "abc123"),
            ("Access_Token", "xyz789"), // Case variation
            ("refresh_token", "refresh123"),
            ("client_secret", "secret456"),
            ("code", "authcode789"),
            ("token", "sometoken"),
            ("id_token", "idtoken123"),
            ("session_state", "sess456"),
            ("authorization", "bearer123"),
        ];

        for (key, value) in test_cases {
            let url_str = format!("http://example.com/path?{}={}", key, value);
            let url = Url::parse(&url_str).unwrap();

            let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

            assert!(
                result.contains(&format!("{}=***", key)),
                "Expected '{}=***' in result '{}'",
                key,
                result
            );
            assert!(
                !result.contains(value),
                "Value '{}' should be redacted in result '{}'",
                value,
                result
            );
        }
    }

    #[test]
    fn path_and_query_redacted_handles_mixed_params() {
        let url = Url::parse(
            "http://localhost:8000/authenticate?code=secret123&realm=realm&Session_State=sess456&client_id=client",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        // Safe params preserved
        assert!(result.contains("realm=realm"));
        assert!(result.contains("client_id=client"));

        // Sensitive params redacted
        assert!(result.contains("code=***"));
        assert!(result.contains("Session_State=***"));
        assert!(!result.contains("secret123"));
        assert!(!result.contains("sess456"));
    }

    #[test]
    fn sanitize_handles_empty_query_string() {
        let url = Url::parse("http://example.com/path").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert_eq!(result, "/path");
        assert!(!result.contains("?"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // is_sensitive_param Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn is_sensitive_param_detects_all_deny_list_items() {
        for param in SENSITIVE_QUERY_PARAMS {
            assert!(
                is_sensitive_param(param),
                "'{}' should be detected as sensitive",
                param
            );
        }
    }

    #[test]
    fn is_sensitive_param_is_case_insensitive() {
        assert!(is_sensitive_param("ACCESS_TOKEN"));
        assert!(is_sensitive_param("Access_Token"));
        assert!(is_sensitive_param("Refresh_Token"));
    }

    #[test]
    fn is_sensitive_param_requires_exact_match() {
        assert!(!is_sensitive_param("access_token_id"));
        assert!(!is_sensitive_param("tokens"));
        assert!(!is_sensitive_param("state"));
        assert!(!is_sensitive_param("realm"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Misc Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn build_http_client_succeeds() {
        assert!(build_http_client().is_ok());
    }

    #[test]
    fn logging_mode_default_is_path_only() {
        assert_eq!(LoggingMode::default(), LoggingMode::PathOnly);
    }
}

#[cfg(test)]
mod wiremock_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Adapter stand-in with a scripted refresh outcome.
    struct StubAdapter {
        token: Option<&'static str>,
        refresh_result: Result<bool, AppError>,
        login_calls: AtomicUsize,
    }

    impl StubAdapter {
        fn healthy(token: &'static str) -> Self {
            Self {
                token: Some(token),
                refresh_result: Ok(false),
                login_calls: AtomicUsize::new(0),
            }
        }

        fn expired() -> Self {
            Self {
                token: Some("stale_token"),
                refresh_result: Err(AppError::SessionExpired),
                login_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityAdapter for StubAdapter {
        async fn initialize(&self) -> Result<bool, AppError> {
            Ok(self.token.is_some())
        }

        async fn refresh_if_needed(&self, _lookahead: Duration) -> Result<bool, AppError> {
            match &self.refresh_result {
                Ok(refreshed) => Ok(*refreshed),
                Err(AppError::SessionExpired) => Err(AppError::SessionExpired),
                Err(_) => Err(AppError::NotAuthenticated),
            }
        }

        async fn login(&self) -> Result<(), AppError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn logout(&self) -> Result<(), AppError> {
            Ok(())
        }

        async fn access_token(&self) -> Option<SecretString> {
            self.token.map(|t| SecretString::from(t.to_string()))
        }

        async fn is_authenticated(&self) -> bool {
            self.token.is_some()
        }
    }

    #[tokio::test]
    async fn request_attaches_bearer_token() {
        let backend = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/hello"))
            .and(header("Authorization", "Bearer stub_token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello User123"))
            .expect(1)
            .mount(&backend)
            .await;

        let adapter = Arc::new(StubAdapter::healthy("stub_token"));
        let client = AuthedClient::new(adapter).unwrap();

        let url = Url::parse(&format!("{}/hello", backend.uri())).unwrap();
        let response = client.get(url).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "Hello User123");
    }

    #[tokio::test]
    async fn refresh_failure_forces_login_and_abandons_request() {
        let backend = MockServer::start().await;

        // The backend must never see the request
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let adapter = Arc::new(StubAdapter::expired());
        let client = AuthedClient::new(adapter.clone()).unwrap();

        let url = Url::parse(&format!("{}/hello", backend.uri())).unwrap();
        let result = client.get(url).await;

        assert!(matches!(result, Err(AppError::LoginRequired)));
        assert_eq!(adapter.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_without_session_is_not_authenticated() {
        let backend = MockServer::start().await;

        let adapter = Arc::new(StubAdapter {
            token: None,
            refresh_result: Ok(false),
            login_calls: AtomicUsize::new(0),
        });
        let client = AuthedClient::new(adapter).unwrap();

        let url = Url::parse(&format!("{}/hello", backend.uri())).unwrap();
        let result = client.get(url).await;

        assert!(matches!(result, Err(AppError::NotAuthenticated)));
    }
}
