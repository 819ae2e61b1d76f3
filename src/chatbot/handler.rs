//! Command and message handlers for incoming Telegram messages.

use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::telegram::{Message, MessageSender};

use super::engine::ConversationEngine;

const GREETING: &str = "Hi! I'm TravelBuddy, your travel assistant. \
    Ask me to find flights, hotels or Airbnbs, convert a budget, or tell you about a destination.\n\
    Send /new to start a fresh conversation or /help for more.";

const HELP_TEXT: &str = "Here's what I can do:\n\
    - Search flights, hotels and Airbnbs (sorted by price)\n\
    - Work out trip budgets\n\
    - Look up information about tourist spots\n\n\
    Commands:\n\
    /start - Say hello\n\
    /new - Forget our conversation and start over\n\
    /help - Show this message";

const NEW_CONVERSATION: &str = "Okay, I've started a new conversation. Where would you like to go?";

/// Bot commands understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Command {
    Start,
    New,
    Help,
}

/// What an incoming text turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    /// A `/command`, `None` when the command is not recognised.
    Command(Option<Command>),
    Text(&'a str),
}

/// Classifies message text, accepting `/cmd@botname arguments` forms.
pub fn parse_input(text: &str) -> Input<'_> {
    let Some(rest) = text.trim_start().strip_prefix('/') else {
        return Input::Text(text);
    };
    let token = rest.split_whitespace().next().unwrap_or_default();
    let name = token.split('@').next().unwrap_or_default();
    Input::Command(Command::from_str(name).ok())
}

/// Handlers shared by every dispatched update.
pub struct BotHandlers {
    engine: Arc<ConversationEngine>,
    sender: Arc<dyn MessageSender>,
}

impl BotHandlers {
    pub fn new(engine: Arc<ConversationEngine>, sender: Arc<dyn MessageSender>) -> Self {
        Self { engine, sender }
    }

    /// Routes one incoming message to the matching command or to the engine.
    pub async fn handle_message(&self, message: &Message) -> Result<()> {
        let Some(text) = message.text.as_deref() else {
            debug!("Ignoring non-text message {}", message.message_id);
            return Ok(());
        };
        let chat_id = message.chat.id;

        match parse_input(text) {
            Input::Command(Some(Command::Start)) => {
                self.sender.send_message(chat_id, GREETING).await
            }
            Input::Command(Some(Command::New)) => {
                self.engine.reset(chat_id).await;
                info!("Started a new conversation in chat {chat_id}");
                self.sender.send_message(chat_id, NEW_CONVERSATION).await
            }
            Input::Command(Some(Command::Help) | None) => {
                self.sender.send_message(chat_id, HELP_TEXT).await
            }
            Input::Text(text) => {
                info!("Received message in chat {chat_id}: {text}");

                if let Err(e) = self.sender.send_typing(chat_id).await {
                    debug!("Failed to send typing indicator: {e}");
                }

                let reply = self
                    .engine
                    .respond(chat_id, message.from.as_ref(), text)
                    .await;
                self.sender.send_message(chat_id, &reply).await?;
                info!("Replied in chat {chat_id}: {reply}");
                Ok(())
            }
        }
    }
}
