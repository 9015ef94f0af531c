// The send path: validate input, insert optimistically, confirm with the
// server, then either reconcile ids and start the delivery countdown or mark
// the message failed and hand the text back for a retry.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use thiserror::Error;
use uuid::Uuid;

use crate::api::{TransportClient, TransportError};
use crate::chat::conversations::ConversationIndex;
use crate::chat::delivery::DeliveryScheduler;
use crate::chat::message_store::MessageStore;
use crate::models::{DeliveryStatus, Message};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message text is empty")]
    EmptyInput,
    #[error("the previous send for this conversation is still being confirmed")]
    AlreadyInFlight,
    #[error("no conversation is open")]
    NoActiveConversation,
    #[error("failed to deliver message: {source}")]
    Transport {
        source: TransportError,
        /// The trimmed input, handed back so the caller can restore it into
        /// the compose box.
        text: String,
    },
}

impl SendError {
    /// The typed text to put back in the input box, when the failure left
    /// any to restore.
    pub fn restorable_text(&self) -> Option<&str> {
        match self {
            SendError::Transport { text, .. } => Some(text),
            _ => None,
        }
    }
}

pub struct SendPipeline {
    transport: Arc<dyn TransportClient>,
    sender_id: String,
    // Conversations with an unconfirmed send outstanding. One at a time per
    // conversation keeps message order unambiguous.
    in_flight: HashSet<String>,
}

impl SendPipeline {
    pub fn new(transport: Arc<dyn TransportClient>, sender_id: impl Into<String>) -> Self {
        SendPipeline {
            transport,
            sender_id: sender_id.into(),
            in_flight: HashSet::new(),
        }
    }

    pub fn is_in_flight(&self, conversation_id: &str) -> bool {
        self.in_flight.contains(conversation_id)
    }

    fn try_begin(&mut self, conversation_id: &str, raw_text: &str) -> Result<String, SendError> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyInput);
        }
        if self.in_flight.contains(conversation_id) {
            return Err(SendError::AlreadyInFlight);
        }
        self.in_flight.insert(conversation_id.to_string());
        Ok(text.to_string())
    }

    /// Send `raw_text` into the conversation the store holds. The optimistic
    /// insert happens synchronously, before any network suspension, so the
    /// caller can redraw immediately and see the pending message.
    pub async fn send(
        &mut self,
        store: &mut MessageStore,
        index: &mut ConversationIndex,
        scheduler: &mut DeliveryScheduler,
        raw_text: &str,
    ) -> Result<Message, SendError> {
        let conversation_id = store.conversation_id().to_string();
        let text = self.try_begin(&conversation_id, raw_text)?;

        let temp_id = format!("local-{}", Uuid::new_v4());
        let message = Message {
            id: temp_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            text: text.clone(),
            sent_at: Utc::now(),
            status: DeliveryStatus::Pending,
        };
        store.append(message.clone());
        index.on_message_activity(&conversation_id, &message);
        debug!(
            "Optimistically inserted message {} into {}",
            temp_id, conversation_id
        );

        let result = self.transport.send_message(&conversation_id, &text).await;
        self.in_flight.remove(&conversation_id);

        match result {
            Ok(confirmed) => {
                store.replace_id(&temp_id, &confirmed.id);
                if let Err(e) = store.update_status(&confirmed.id, DeliveryStatus::Sent) {
                    // The conversation was switched away mid-send; nothing
                    // left to reconcile.
                    debug!("Send confirmation for {}: {}", confirmed.id, e);
                    return Ok(confirmed);
                }
                info!(
                    "Message {} confirmed as {} in {}",
                    temp_id, confirmed.id, conversation_id
                );
                let sent = store.get(&confirmed.id).cloned().unwrap_or(confirmed);
                index.on_message_activity(&conversation_id, &sent);
                scheduler.schedule(&sent.id);
                Ok(sent)
            }
            Err(source) => {
                error!("Failed to send message to {}: {}", conversation_id, source);
                if let Err(e) = store.update_status(&temp_id, DeliveryStatus::Failed) {
                    debug!("Could not mark {} as failed: {}", temp_id, e);
                }
                if let Some(failed) = store.get(&temp_id) {
                    index.on_message_activity(&conversation_id, failed);
                }
                Err(SendError::Transport { source, text })
            }
        }
    }
}
