//! Conversation engine: session history, the language model and the tool loop.

use std::sync::Arc;

use log::{debug, error};

use crate::openrouter::{ChatModel, Message};
use crate::telegram::User;
use crate::tools::ToolConnectionManager;
use crate::types::{ChatId, MessageRole};

use super::context::build_dynamic_context;
use super::session::SessionStore;
use super::tool_loop::run_tool_loop;

pub struct ConversationEngine {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolConnectionManager>,
    sessions: SessionStore,
}

impl ConversationEngine {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolConnectionManager>,
        sessions: SessionStore,
    ) -> Self {
        Self {
            model,
            tools,
            sessions,
        }
    }

    /// Produces the reply for `text`. Failures become an apology, never an error.
    pub async fn respond(&self, chat_id: ChatId, user: Option<&User>, text: &str) -> String {
        let user_message = Message::text(MessageRole::User, text);
        let mut conversation_history = self.sessions.history(chat_id).await;
        conversation_history.push(user_message.clone());
        debug!(
            "Conversation history for chat {chat_id} has {} messages",
            conversation_history.len()
        );

        let dynamic_context = build_dynamic_context(chat_id, user);

        match run_tool_loop(
            self.model.as_ref(),
            &self.tools,
            &mut conversation_history,
            &dynamic_context,
        )
        .await
        {
            Ok(reply) => {
                self.sessions
                    .append(
                        chat_id,
                        [
                            user_message,
                            Message::text(MessageRole::Assistant, reply.clone()),
                        ],
                    )
                    .await;
                reply
            }
            Err(e) => {
                error!("Error processing message from chat {chat_id}: {e}");
                e.user_message()
            }
        }
    }

    /// Forgets the chat's history.
    pub async fn reset(&self, chat_id: ChatId) {
        self.sessions.reset(chat_id).await;
    }
}
