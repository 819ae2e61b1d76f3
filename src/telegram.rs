//! Telegram Bot API: inbound update models and the outbound message channel.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::types::ChatId;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than 4096 UTF-16 code units.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// An incoming update. Only the fields the bot reads are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }
}

/// Outbound channel back to the chat platform.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<()>;

    /// Shows the "typing..." indicator in the chat.
    async fn send_typing(&self, chat_id: ChatId) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: ChatId,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SendChatActionRequest {
    chat_id: ChatId,
    action: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{TELEGRAM_API_URL}/bot{token}"),
        }
    }

    async fn call(&self, method: &str, body: &impl Serialize) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let api_response: ApiResponse = response.json().await?;
        if !api_response.ok {
            return Err(BotError::TelegramApi(format!(
                "{method} failed ({status}): {}",
                api_response
                    .description
                    .unwrap_or_else(|| "no description".to_string())
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let chunks = split_message(text, MAX_MESSAGE_LENGTH);
        debug!("Sending {} message chunk(s) to chat {chat_id}", chunks.len());
        for chunk in &chunks {
            self.call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id,
                    text: chunk,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        self.call(
            "sendChatAction",
            &SendChatActionRequest {
                chat_id,
                action: "typing",
            },
        )
        .await
    }
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Splits `text` into chunks of at most `limit` UTF-16 units, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if utf16_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = utf16_len(line);
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        // A single line longer than the limit is cut at character boundaries.
        for ch in line.chars() {
            let ch_len = ch.len_utf16();
            if current_len + ch_len > limit {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += ch_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
