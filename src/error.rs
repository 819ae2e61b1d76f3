use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OpenRouter API error ({status}): {message}")]
    OpenRouterApi {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("OpenRouter response error: {0}")]
    OpenRouterResponse(String),

    #[error("Telegram API error: {0}")]
    TelegramApi(String),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Failed to connect to tool provider '{provider}': {message}")]
    ToolConnect { provider: String, message: String },

    #[error("Tool provider '{provider}' protocol error: {message}")]
    ToolProtocol { provider: String, message: String },

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Tool loop limit exceeded")]
    ToolLoopLimit,

    #[error("Dispatcher is not accepting updates")]
    DispatcherClosed,

    #[error("Startup failed: {0}")]
    Startup(Box<StartupError>),
}

impl From<StartupError> for BotError {
    fn from(err: StartupError) -> Self {
        BotError::Startup(Box::new(err))
    }
}

impl BotError {
    /// Returns a user-friendly error message suitable for sending to a Telegram chat
    pub fn user_message(&self) -> String {
        match self {
            BotError::Config(_) | BotError::EnvVar(_) | BotError::Startup(_) => {
                "Sorry, there's a configuration issue on my end. Please contact the bot administrator.".to_string()
            }
            BotError::OpenRouterApi { status, .. } => {
                match *status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        "Sorry, I'm having authentication issues with my AI service. Please contact the bot administrator.".to_string()
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        "Sorry, I've hit my rate limit. Please try again in a few moments.".to_string()
                    }
                    status if status.is_server_error() => {
                        "Sorry, the AI service is experiencing issues right now. Please try again later.".to_string()
                    }
                    status if status.is_client_error() => {
                        "Sorry, there was an issue with my request to the AI service. Please try again or contact the bot administrator.".to_string()
                    }
                    _ => {
                        "Sorry, I'm having trouble connecting to my AI service. Please try again later.".to_string()
                    }
                }
            }
            BotError::OpenRouterResponse(_) | BotError::Json(_) => {
                "Sorry, I received an unexpected response from my AI service. Please try again.".to_string()
            }
            BotError::Reqwest(_) | BotError::Io(_) | BotError::TelegramApi(_) => {
                "Sorry, I'm having network issues. Please try again in a moment.".to_string()
            }
            BotError::ToolConnect { .. }
            | BotError::ToolProtocol { .. }
            | BotError::ToolUnavailable(_)
            | BotError::ToolInvocation { .. } => {
                "Sorry, one of my travel services is unavailable right now. Please try again later or ask me something else.".to_string()
            }
            BotError::ToolLoopLimit => {
                "Sorry, I got stuck in a loop. Please try rephrasing your request.".to_string()
            }
            BotError::DispatcherClosed => {
                "Sorry, I'm restarting right now. Please try again in a moment.".to_string()
            }
        }
    }
}

/// Errors that abort startup before the webhook starts serving.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Startup was already attempted")]
    AlreadyStarted,

    #[error("Shutdown was requested while starting")]
    Aborted,

    #[error("Tool provider connection failed: {0}")]
    ToolConnect(#[source] BotError),
}

pub type Result<T> = std::result::Result<T, BotError>;
