//! Webhook server: startup/shutdown lifecycle and the HTTP endpoints.
//!
//! The [`Lifecycle`] moves through
//! `Uninitialized -> Starting -> Ready -> ShuttingDown -> Stopped`, or ends in
//! `StartupFailed`. The [`ApplicationState`] exists only while `Ready`;
//! webhook requests arriving in any other phase get `503` and dispatch nothing.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{debug, error, info};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::chatbot::{BotHandlers, ConversationEngine, SessionStore};
use crate::dispatcher::Dispatcher;
use crate::error::{BotError, StartupError};
use crate::openrouter::ChatModel;
use crate::telegram::{MessageSender, Update};
use crate::tools::{ToolConnectionManager, ToolConnector, ToolProviderSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
    StartupFailed,
}

/// Everything the startup sequence needs.
pub struct Startup {
    pub specs: Vec<ToolProviderSpec>,
    pub connector: Arc<dyn ToolConnector>,
    pub model: Arc<dyn ChatModel>,
    pub sender: Arc<dyn MessageSender>,
    pub sessions: SessionStore,
}

/// Live tool connections and the dispatcher that uses them.
pub struct ApplicationState {
    pub tools: Arc<ToolConnectionManager>,
    pub dispatcher: Dispatcher,
}

impl std::fmt::Debug for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationState").finish_non_exhaustive()
    }
}

impl ApplicationState {
    /// Connects tools, then builds the engine and dispatcher on top of them.
    pub async fn start(startup: Startup) -> Result<Self, StartupError> {
        info!("Connecting to MCP servers...");
        let tools = ToolConnectionManager::connect(&startup.specs, startup.connector.as_ref())
            .await
            .map_err(StartupError::ToolConnect)?;
        let tools = Arc::new(tools);
        info!("MCP client connected");

        let engine = Arc::new(ConversationEngine::new(
            startup.model,
            Arc::clone(&tools),
            startup.sessions,
        ));

        let dispatcher = Dispatcher::new(BotHandlers::new(engine, startup.sender));
        info!("Bot dispatcher initialized");

        Ok(Self { tools, dispatcher })
    }

    /// Drains the dispatcher before closing tools, since in-flight handlers may still call them.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        info!("Bot dispatcher shut down");
        self.tools.cleanup().await;
        info!("MCP client cleaned up");
    }
}

struct Inner {
    phase: Phase,
    app: Option<Arc<ApplicationState>>,
}

pub struct Lifecycle {
    inner: RwLock<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                phase: Phase::Uninitialized,
                app: None,
            }),
        }
    }

    pub async fn phase(&self) -> Phase {
        self.inner.read().await.phase
    }

    /// The application state, only while `Ready`.
    pub async fn app(&self) -> Option<Arc<ApplicationState>> {
        let inner = self.inner.read().await;
        match inner.phase {
            Phase::Ready => inner.app.clone(),
            _ => None,
        }
    }

    /// Runs the startup sequence once.
    pub async fn start(&self, startup: Startup) -> Result<Arc<ApplicationState>, StartupError> {
        {
            let mut inner = self.inner.write().await;
            if inner.phase != Phase::Uninitialized {
                return Err(StartupError::AlreadyStarted);
            }
            inner.phase = Phase::Starting;
        }
        info!("Application starting up...");

        let app = match ApplicationState::start(startup).await {
            Ok(app) => Arc::new(app),
            Err(e) => {
                error!("A critical error occurred during startup: {e}");
                self.inner.write().await.phase = Phase::StartupFailed;
                return Err(e);
            }
        };

        let mut inner = self.inner.write().await;
        if inner.phase != Phase::Starting {
            // shutdown() ran while we were starting
            drop(inner);
            app.shutdown().await;
            return Err(StartupError::Aborted);
        }
        inner.phase = Phase::Ready;
        inner.app = Some(Arc::clone(&app));
        info!("Application ready for webhooks");
        Ok(app)
    }

    /// Shuts down once; later calls and calls outside `Ready` only settle the phase.
    pub async fn shutdown(&self) {
        let app = {
            let mut inner = self.inner.write().await;
            match inner.phase {
                Phase::Ready => {
                    inner.phase = Phase::ShuttingDown;
                    inner.app.take()
                }
                Phase::Uninitialized | Phase::Starting => {
                    inner.phase = Phase::Stopped;
                    None
                }
                Phase::ShuttingDown | Phase::Stopped | Phase::StartupFailed => {
                    debug!("Shutdown requested in phase {:?}, nothing to do", inner.phase);
                    return;
                }
            }
        };

        info!("Application shutting down...");
        if let Some(app) = app {
            app.shutdown().await;
        }
        self.inner.write().await.phase = Phase::Stopped;
        info!("Application stopped");
    }
}

/// Errors returned by the webhook endpoint.
#[derive(Debug)]
pub enum WebhookError {
    ServiceUnavailable,
    /// Decode and dispatch failures alike; Telegram only sees a 500.
    Processing(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            WebhookError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable: Bot not initialized.",
            ),
            WebhookError::Processing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Builds the HTTP router. The bot token is part of the webhook path.
pub fn router(lifecycle: Arc<Lifecycle>, bot_token: &str) -> Router {
    Router::new()
        .route("/", get(health))
        .route(&format!("/webhook/{bot_token}"), post(webhook))
        .with_state(lifecycle)
}

async fn health() -> Json<Value> {
    Json(json!({ "message": "Telegram Bot Webhook is running." }))
}

async fn webhook(
    State(lifecycle): State<Arc<Lifecycle>>,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let Some(app) = lifecycle.app().await else {
        error!("Bot application not initialized when webhook received");
        return Err(WebhookError::ServiceUnavailable);
    };

    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        error!("Error processing webhook update: {e}");
        WebhookError::Processing(e.to_string())
    })?;
    debug!("Received update {}", update.update_id);

    match app.dispatcher.dispatch(update) {
        Ok(()) => Ok(Json(json!({ "status": "ok" }))),
        Err(BotError::DispatcherClosed) => Err(WebhookError::ServiceUnavailable),
        Err(e) => {
            error!("Error processing webhook update: {e}");
            Err(WebhookError::Processing(e.to_string()))
        }
    }
}
