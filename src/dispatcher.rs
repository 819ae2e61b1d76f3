//! Routes decoded updates to the bot handlers as tracked background tasks.
//!
//! Updates from one chat are handled strictly in arrival order by a single
//! worker task, so a `/new` never races an earlier turn of the same chat.
//! Different chats run concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info};
use tokio_util::task::TaskTracker;

use crate::chatbot::BotHandlers;
use crate::error::{BotError, Result};
use crate::telegram::{Message, Update};
use crate::types::ChatId;

/// Messages waiting behind the running worker, keyed by chat.
///
/// A chat has an entry exactly while its worker is alive.
type ChatQueues = Arc<Mutex<HashMap<ChatId, VecDeque<Message>>>>;

pub struct Dispatcher {
    handlers: Arc<BotHandlers>,
    tracker: TaskTracker,
    queues: ChatQueues,
}

impl Dispatcher {
    pub fn new(handlers: BotHandlers) -> Self {
        Self {
            handlers: Arc::new(handlers),
            tracker: TaskTracker::new(),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queues `update` for handling and returns immediately.
    ///
    /// Handler errors are logged; they never reach the webhook caller.
    pub fn dispatch(&self, update: Update) -> Result<()> {
        let update_id = update.update_id;
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the queue lock so shutdown cannot close the tracker in between.
        if self.tracker.is_closed() {
            return Err(BotError::DispatcherClosed);
        }

        let Some(message) = update.message else {
            debug!("Update {update_id} carries no message, ignoring");
            return Ok(());
        };

        let chat_id = message.chat.id;
        if let Some(queue) = queues.get_mut(&chat_id) {
            debug!("Chat {chat_id} is busy, queueing update {update_id}");
            queue.push_back(message);
            return Ok(());
        }
        queues.insert(chat_id, VecDeque::new());
        drop(queues);

        let handlers = Arc::clone(&self.handlers);
        let queues = Arc::clone(&self.queues);
        self.tracker
            .spawn(run_chat_worker(handlers, queues, chat_id, message));
        Ok(())
    }

    /// Number of chat workers still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting updates and waits for in-flight and queued handlers to finish.
    pub async fn shutdown(&self) {
        {
            let _queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            self.tracker.close();
        }
        if !self.tracker.is_empty() {
            info!("Waiting for {} busy chats", self.tracker.len());
        }
        self.tracker.wait().await;
        debug!("Dispatcher drained");
    }
}

async fn run_chat_worker(
    handlers: Arc<BotHandlers>,
    queues: ChatQueues,
    chat_id: ChatId,
    first: Message,
) {
    let mut next = Some(first);
    while let Some(message) = next {
        if let Err(e) = handlers.handle_message(&message).await {
            error!(
                "Error handling message {} in chat {chat_id}: {e}",
                message.message_id
            );
        }

        next = {
            let mut queues = queues.lock().unwrap_or_else(PoisonError::into_inner);
            let queued = queues.get_mut(&chat_id).and_then(VecDeque::pop_front);
            if queued.is_none() {
                queues.remove(&chat_id);
            }
            queued
        };
    }
}
