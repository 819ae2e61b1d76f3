//! Common types used throughout the travelbuddy bot.

use serde::{Deserialize, Serialize};

/// Role of a message in the conversation.
///
/// Maps to OpenRouter API message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the human user
    User,
    /// Message from the AI assistant
    Assistant,
    /// System prompt or instructions
    System,
    /// Result from a tool execution
    Tool,
}

/// Telegram chat identifier.
pub type ChatId = i64;
