use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use log::{debug, error, info};

use crate::chatbot::DEFAULT_SYSTEM_PROMPT;
use crate::error::{BotError, Result};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    pub system_prompt: String,
    pub bind_addr: SocketAddr,
    pub tool_providers_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        debug!("Loading configuration from environment");
        dotenvy::dotenv().ok();

        let telegram_token = env::var("TELEGRAM_BOT_TOKEN").map_err(|e| {
            error!("Failed to load TELEGRAM_BOT_TOKEN from environment: {e}");
            e
        })?;

        let openrouter_api_key = env::var("OPENROUTER_API_KEY").map_err(|e| {
            error!("Failed to load OPENROUTER_API_KEY from environment: {e}");
            e
        })?;

        let openrouter_model = env::var("OPENROUTER_MODEL").map_err(|e| {
            error!("Failed to load OPENROUTER_MODEL from environment: {e}");
            e
        })?;

        let system_prompt =
            env::var("SYSTEM_PROMPT").unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| {
                error!("Invalid BIND_ADDR: {e}");
                BotError::Config(format!("invalid BIND_ADDR: {e}"))
            })?;

        let tool_providers_file = env::var("TOOL_PROVIDERS_FILE").ok().map(PathBuf::from);

        info!("Configuration loaded successfully");
        debug!("Telegram token length: {} characters", telegram_token.len());
        debug!(
            "OpenRouter API key length: {} characters",
            openrouter_api_key.len()
        );
        debug!("OpenRouter model: {openrouter_model}");
        debug!("System prompt length: {} characters", system_prompt.len());
        debug!("Bind address: {bind_addr}");
        debug!("Tool providers file: {tool_providers_file:?}");

        Ok(Self {
            telegram_token,
            openrouter_api_key,
            openrouter_model,
            system_prompt,
            bind_addr,
            tool_providers_file,
        })
    }
}
