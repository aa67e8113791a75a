//! Interactive authorization-code login flow with PKCE.
//!
//! Implements the redirect-based login against the realm's authorization
//! endpoint with:
//! - PKCE (Proof Key for Code Exchange) using the S256 method
//! - Port fallback strategy for the loopback callback server
//! - Secure credential handling with `SecretString`

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::Url;

use crate::config::{AdapterConfig, RealmUrls};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Ports to try for the login callback server, in order of preference.
/// Port 0 means "let the OS choose an available port".
const CALLBACK_PORTS: &[u16] = &[8477, 8478, 8479, 9876, 0];

/// Timeout for waiting for the login callback (2 minutes).
const CALLBACK_TIMEOUT_SECS: u64 = 120;

/// Scope requested from the identity provider.
const OAUTH_SCOPE: &str = "openid";

// ─────────────────────────────────────────────────────────────────────────────
// PKCE
// ─────────────────────────────────────────────────────────────────────────────

/// PKCE challenge and verifier pair.
struct PkceChallenge {
    /// The verifier (kept secret, sent during token exchange).
    verifier: String,
    /// The challenge (sent during authorization, derived from verifier).
    challenge: String,
}

impl PkceChallenge {
    /// Generates a new PKCE challenge using the S256 method.
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: [u8; 32] = rng.gen();
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        let challenge = URL_SAFE_NO_PAD.encode(hash);

        Self {
            verifier,
            challenge,
        }
    }
}

/// Generates a random URL-safe token for the `state` and `nonce` parameters.
pub(crate) fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let state_bytes: [u8; 16] = rng.gen();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Port Binding
// ─────────────────────────────────────────────────────────────────────────────

/// Finds an available port for the login callback server.
///
/// Tries ports in the priority list. If port 0 is used, the OS assigns an
/// available port.
///
/// # Errors
///
/// Returns `AppError::PortBindFailed` if no port could be bound.
pub async fn find_available_port() -> Result<(TcpListener, u16), AppError> {
    for &port in CALLBACK_PORTS {
        let addr = format!("127.0.0.1:{}", port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                let actual_port = listener
                    .local_addr()
                    .map_err(|_| AppError::PortBindFailed)?
                    .port();
                info!("Login callback server bound to port {}", actual_port);
                return Ok((listener, actual_port));
            }
            Err(_) => {
                if port != 0 {
                    warn!("Port {} unavailable, trying next...", port);
                }
            }
        }
    }

    error!("Failed to bind to any callback port");
    Err(AppError::PortBindFailed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Callback Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed callback parameters from the login redirect.
#[derive(Debug)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// Parses the callback request line to extract code and state.
///
/// # Arguments
///
/// * `request_line` - The HTTP request line (e.g., "GET /callback?code=...&state=... HTTP/1.1")
///
/// # Errors
///
/// Returns `AppError::OAuthError` if parsing fails or required parameters are missing.
pub fn parse_callback_request(request_line: &str) -> Result<CallbackParams, AppError> {
    // Format: "GET /callback?code=XXX&state=YYY HTTP/1.1"
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(AppError::OAuthError("Invalid request format".into()));
    }

    let path_and_query = parts[1];

    let fake_base = format!("http://localhost{}", path_and_query);
    let url = Url::parse(&fake_base).map_err(|_| AppError::OAuthError("Invalid URL".into()))?;

    if url.path() != "/callback" {
        return Err(AppError::OAuthError(format!(
            "Unexpected path: {}",
            url.path()
        )));
    }

    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => {
                let error_desc = url
                    .query_pairs()
                    .find(|(k, _)| k == "error_description")
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| value.to_string());
                return Err(AppError::OAuthError(error_desc));
            }
            _ => {}
        }
    }

    let code = code.ok_or_else(|| AppError::OAuthError("Missing authorization code".into()))?;
    let state = state.ok_or_else(|| AppError::OAuthError("Missing state parameter".into()))?;

    Ok(CallbackParams { code, state })
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Response
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the realm's token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Login Flow
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the interactive authorization-code login flow.
///
/// This function:
/// 1. Binds a loopback callback server
/// 2. Opens the browser on the realm's login page
/// 3. Waits for the redirect callback
/// 4. Exchanges the authorization code for tokens
///
/// Persisting the tokens is the caller's concern; see
/// [`super::session::KeycloakAdapter`].
///
/// # Errors
///
/// - `PortBindFailed` - Could not bind the callback server
/// - `OAuthError` - Login flow failed (user denied, invalid response, timeout)
/// - `ConnectionFailed` - Network error during token exchange
pub async fn start_login_flow(
    http: &reqwest::Client,
    config: &AdapterConfig,
) -> Result<TokenResponse, AppError> {
    let urls = config.realm_urls()?;

    let (listener, port) = find_available_port().await?;
    let redirect_uri = format!("http://127.0.0.1:{}/callback", port);

    let pkce = PkceChallenge::generate();
    let state = generate_state();
    let nonce = generate_state();

    let auth_url = build_auth_url(
        &urls,
        &config.resource,
        &redirect_uri,
        &pkce.challenge,
        &state,
        &nonce,
    );

    info!("Opening browser for identity provider login...");
    open::that(auth_url.as_str()).map_err(|e| {
        error!("Failed to open browser: {}", e);
        AppError::OAuthError("Failed to open browser for login".into())
    })?;

    info!("Waiting for callback on port {}...", port);

    let callback_params =
        wait_for_callback(listener, &state, Duration::from_secs(CALLBACK_TIMEOUT_SECS)).await?;

    exchange_code(
        http,
        urls.token_url(),
        &config.resource,
        &callback_params.code,
        &redirect_uri,
        &pkce.verifier,
    )
    .await
}

/// Builds the authorization URL with PKCE.
fn build_auth_url(
    urls: &RealmUrls,
    client_id: &str,
    redirect_uri: &str,
    code_challenge: &str,
    state: &str,
    nonce: &str,
) -> Url {
    let mut url = urls.auth_url().clone();

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", OAUTH_SCOPE)
        .append_pair("state", state)
        .append_pair("nonce", nonce)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");

    url
}

/// Waits for the login callback on the given listener.
async fn wait_for_callback(
    listener: TcpListener,
    expected_state: &str,
    timeout: Duration,
) -> Result<CallbackParams, AppError> {
    let result = tokio::time::timeout(timeout, async {
        loop {
            let (mut stream, _addr) = listener.accept().await.map_err(|e| {
                error!("Failed to accept connection: {}", e);
                AppError::OAuthError("Callback server error".into())
            })?;

            let mut reader = BufReader::new(&mut stream);
            let mut request_line = String::new();

            reader.read_line(&mut request_line).await.map_err(|e| {
                error!("Failed to read request: {}", e);
                AppError::OAuthError("Failed to read callback".into())
            })?;

            match parse_callback_request(&request_line) {
                Ok(params) => {
                    if params.state != expected_state {
                        warn!("State mismatch - possible CSRF attack");
                        send_error_response(&mut stream, "State mismatch").await;
                        return Err(AppError::OAuthError("State validation failed".into()));
                    }

                    send_success_response(&mut stream).await;
                    return Ok(params);
                }
                Err(e) => {
                    // Browsers also request /favicon.ico against the callback
                    // server; ignore those and keep waiting.
                    if request_line.contains("/favicon") {
                        send_not_found_response(&mut stream).await;
                        continue;
                    }

                    send_error_response(&mut stream, "Invalid callback").await;
                    return Err(e);
                }
            }
        }
    })
    .await;

    result.map_err(|_| {
        error!("Login callback timed out");
        AppError::OAuthError("Login timed out - please try again".into())
    })?
}

/// Sends an HTTP 200 success response.
async fn send_success_response(stream: &mut tokio::net::TcpStream) {
    let body = r#"<!DOCTYPE html>
<html>
<head><title>Login Successful</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>Login Successful</h1>
<p>You may close this window and return to the application.</p>
</body>
</html>"#;

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

/// Sends an HTTP 400 error response.
async fn send_error_response(stream: &mut tokio::net::TcpStream, message: &str) {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Login Failed</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>Login Failed</h1>
<p>{}</p>
<p>Please close this window and try again.</p>
</body>
</html>"#,
        message
    );

    let response = format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

/// Sends an HTTP 404 response for non-callback requests.
async fn send_not_found_response(stream: &mut tokio::net::TcpStream) {
    let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

/// Exchanges the authorization code for access and refresh tokens.
pub(crate) async fn exchange_code(
    http: &reqwest::Client,
    token_url: &Url,
    client_id: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<TokenResponse, AppError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("client_id", client_id),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("code_verifier", code_verifier),
    ];

    let response = http
        .post(token_url.as_str())
        .form(&params)
        .send()
        .await
        .map_err(|_| AppError::ConnectionFailed("Failed to connect for token exchange".into()))?;

    if !response.status().is_success() {
        let status = response.status();
        // Drain the body without exposing its contents in the error message
        let _ = response.text().await;
        error!("Token exchange failed with status: {}", status);
        return Err(AppError::OAuthError("Token exchange failed".into()));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|_| AppError::OAuthError("Invalid token response".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod wiremock_tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/auth/realms/realm/protocol/openid-connect/token";

    async fn token_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}{}", server.uri(), TOKEN_PATH)).unwrap()
    }

    #[tokio::test]
    async fn exchange_code_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=session-id-1"))
            .and(body_string_contains("code_verifier=verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-token-abc",
                "refresh_token": "refresh-token-def",
                "expires_in": 60,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let http = reqwest::Client::new();
        let result = exchange_code(
            &http,
            &token_url(&mock_server).await,
            "client",
            "session-id-1",
            "http://127.0.0.1:8477/callback",
            "verifier",
        )
        .await;

        let response = result.unwrap();
        assert_eq!(response.access_token, "access-token-abc");
        assert_eq!(response.refresh_token.as_deref(), Some("refresh-token-def"));
        assert_eq!(response.expires_in, Some(60));
    }

    #[tokio::test]
    async fn exchange_code_rejection_is_oauth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let http = reqwest::Client::new();
        let result = exchange_code(
            &http,
            &token_url(&mock_server).await,
            "client",
            "unknown-code",
            "http://127.0.0.1:8477/callback",
            "verifier",
        )
        .await;

        assert!(matches!(result, Err(AppError::OAuthError(_))));
    }
}
