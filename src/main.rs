//! Application entry point: bootstrap the session, fetch the greeting.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kc_hello::config::AdapterConfig;
use kc_hello::error::AppError;
use kc_hello::hello;
use kc_hello::keycloak::{AuthedClient, IdentityAdapter, KeycloakAdapter};
use kc_hello::storage::TokenStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(message) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(err) => {
            let presentation = err.to_presentation();
            error!("[KC] {}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                error!("[KC] {}", action);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<String, AppError> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("keycloak.json"));

    let config = AdapterConfig::from_file(&config_path)?;
    let store = TokenStore::new(config.token_store.clone());
    let backend_url = config.backend_url.clone();

    let adapter: Arc<dyn IdentityAdapter> = Arc::new(KeycloakAdapter::new(config, store)?);

    // Login-required policy: nothing renders before a session exists.
    if !adapter.initialize().await? {
        info!("[KC] No usable session, starting interactive login");
        adapter.login().await?;
    }

    let client = AuthedClient::new(adapter)?;

    let outcome = match hello::fetch_greeting(&client, &backend_url).await {
        // A failed refresh already forced a fresh login; try once more with
        // the new session.
        Err(AppError::LoginRequired) => hello::fetch_greeting(&client, &backend_url).await,
        other => other,
    };

    Ok(hello::render_message(&outcome))
}
