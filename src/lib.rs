pub mod chatbot;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod openrouter;
pub mod server;
pub mod telegram;
pub mod tools;
pub mod types;

use std::sync::Arc;

use log::{debug, error, info};

use chatbot::SessionStore;
use config::Config;
use error::Result;
use openrouter::OpenRouterClient;
use server::{Lifecycle, Startup};
use telegram::TelegramClient;
use tools::{StdioConnector, ToolProviderRegistry};

/// Run the webhook server until a shutdown signal arrives.
pub async fn run() -> Result<()> {
    info!("Initializing bot");
    let config = Config::from_env()?;

    let registry = match &config.tool_providers_file {
        Some(path) => ToolProviderRegistry::from_file(path)?,
        None => ToolProviderRegistry::builtin()?,
    };
    debug!("{} tool providers configured", registry.specs().len());

    let startup = Startup {
        specs: registry.into_specs(),
        connector: Arc::new(StdioConnector),
        model: Arc::new(OpenRouterClient::new(
            config.openrouter_api_key.clone(),
            config.openrouter_model.clone(),
            config.system_prompt.clone(),
        )),
        sender: Arc::new(TelegramClient::new(&config.telegram_token)),
        sessions: SessionStore::default(),
    };

    let lifecycle = Arc::new(Lifecycle::new());
    lifecycle.start(startup).await?;

    let result = serve(&config, Arc::clone(&lifecycle)).await;
    lifecycle.shutdown().await;
    result
}

async fn serve(config: &Config, lifecycle: Arc<Lifecycle>) -> Result<()> {
    let app = server::router(lifecycle, &config.telegram_token);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, shutting down...");
}
