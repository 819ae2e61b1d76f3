//! Dynamic context building for system prompts.

use std::fmt::Write;

use chrono::Utc;

use crate::telegram::User;
use crate::types::ChatId;

/// Builds dynamic context information for the system prompt.
pub fn build_dynamic_context(chat_id: ChatId, user: Option<&User>) -> String {
    let today = Utc::now().format("%Y-%m-%d");

    let mut context = String::from(
        "You are a Telegram bot. Users talk to you in a private or group chat.",
    );

    let _ = write!(context, "\nToday's date is {today}.");
    let _ = write!(context, "\nChat ID: {chat_id}");

    if let Some(user) = user {
        let _ = write!(context, "\nUser: {} (ID: {})", user.display_name(), user.id);
    }

    context
}
