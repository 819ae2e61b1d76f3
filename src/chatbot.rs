//! AI chatbot module - conversations, commands and the tool loop.

mod context;
mod engine;
mod handler;
mod prompt;
mod session;
mod tool_loop;

pub use engine::ConversationEngine;
pub use handler::{BotHandlers, Command, Input, parse_input};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
pub use session::{MAX_HISTORY_MESSAGES, SessionStore};
