// Chat engine: the single owner of all mutable conversation state.
//
// The UI reads snapshots (`conversations()`, `messages()`) and feeds input
// back in through `send`, `open_conversation` and friends; delivery timers
// come back to the same logical thread as `DeliveryTick`s and are applied
// here. Nothing outside this module mutates a `Message` or `Conversation`.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::api::{TransportClient, TransportError};
use crate::models::{Conversation, DeliveryStatus, Message, Participant};

pub mod conversations;
pub mod delivery;
pub mod message_store;
pub mod send_pipeline;

pub use conversations::{filter_conversations, ConversationIndex};
pub use delivery::{DeliveryScheduler, DeliveryTick};
pub use message_store::{MessageStore, StoreError};
pub use send_pipeline::{SendError, SendPipeline};

/// History page size requested when a conversation is opened.
pub const HISTORY_PAGE: usize = 50;

pub struct ChatEngine {
    current_user_id: String,
    transport: Arc<dyn TransportClient>,
    index: ConversationIndex,
    /// History of the one open conversation, if any.
    active: Option<MessageStore>,
    scheduler: DeliveryScheduler,
    pipeline: SendPipeline,
    /// Conversations with a history fetch outstanding; duplicate open
    /// requests are coalesced against this set.
    loading: HashSet<String>,
}

impl ChatEngine {
    pub fn new(
        current_user_id: impl Into<String>,
        transport: Arc<dyn TransportClient>,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveryTick>) {
        let current_user_id = current_user_id.into();
        let (scheduler, tick_rx) = DeliveryScheduler::new();
        let pipeline = SendPipeline::new(Arc::clone(&transport), current_user_id.clone());
        (
            ChatEngine {
                current_user_id,
                transport,
                index: ConversationIndex::new(),
                active: None,
                scheduler,
                pipeline,
                loading: HashSet::new(),
            },
            tick_rx,
        )
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    /// Ordered snapshot for the list view.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.index.all()
    }

    /// Ordered, searched snapshot for the list view.
    pub fn filtered_conversations(&self, query: &str) -> Vec<Conversation> {
        filter_conversations(&self.index.all(), query)
    }

    pub fn unread_total(&self) -> u32 {
        self.index.unread_total()
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.conversation_id())
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_conversation_id().and_then(|id| self.index.get(id))
    }

    /// Sorted history snapshot of the open conversation.
    pub fn messages(&self) -> Vec<Message> {
        self.active.as_ref().map(|s| s.view()).unwrap_or_default()
    }

    pub fn is_send_in_flight(&self) -> bool {
        self.active_conversation_id()
            .map(|id| self.pipeline.is_in_flight(id))
            .unwrap_or(false)
    }

    /// Pull the conversation list from the server and fold it into the
    /// index. A conversation whose summary moved forward with peer-authored,
    /// not-yet-read activity gets its unread badge bumped, unless it is the
    /// one currently on screen.
    pub async fn refresh_conversations(&mut self) -> Result<(), TransportError> {
        let fetched = self.transport.fetch_conversations().await?;
        info!("Fetched {} conversations", fetched.len());
        for conversation in fetched {
            let has_newer_activity = {
                let known = self
                    .index
                    .get(&conversation.id)
                    .and_then(|c| c.last_message.as_ref());
                match (known, conversation.last_message.as_ref()) {
                    (Some(old), Some(new)) => new.sent_at > old.sent_at,
                    (None, Some(_)) => true,
                    _ => false,
                }
            };
            let unread_peer_activity = has_newer_activity
                && conversation
                    .last_message
                    .as_ref()
                    .map(|m| {
                        m.sender_id != self.current_user_id && m.status != DeliveryStatus::Read
                    })
                    .unwrap_or(false);
            let is_on_screen = self
                .active_conversation_id()
                .map(|id| id == conversation.id)
                .unwrap_or(false);

            let id = conversation.id.clone();
            self.index.upsert(conversation);
            if unread_peer_activity && !is_on_screen {
                self.index.bump_unread(&id);
            }
        }
        Ok(())
    }

    /// Open a conversation, fetching its newest history page. Outstanding
    /// delivery timers for the previous conversation are cancelled before
    /// the history swaps, so no stale timer can touch the fresh store. A
    /// request for a conversation that is already open, or already loading,
    /// is coalesced into the earlier one.
    pub async fn open_conversation(&mut self, conversation_id: &str) -> Result<(), TransportError> {
        if self.loading.contains(conversation_id) {
            debug!("Load of {} already in flight, coalescing", conversation_id);
            return Ok(());
        }
        if self.active_conversation_id() == Some(conversation_id) {
            self.index.clear_unread(conversation_id);
            return Ok(());
        }

        self.scheduler.cancel_all();
        self.active = None;

        self.loading.insert(conversation_id.to_string());
        let result = self
            .transport
            .fetch_messages(conversation_id, HISTORY_PAGE, 0)
            .await;
        self.loading.remove(conversation_id);
        let history = result?;

        let mut store = MessageStore::new(conversation_id);
        store.load(history);
        if let Some(latest) = store.latest() {
            let snapshot = latest.clone();
            self.index.on_message_activity(conversation_id, &snapshot);
        }
        self.index.clear_unread(conversation_id);
        debug!(
            "Opened conversation {} with {} messages",
            conversation_id,
            store.len()
        );
        self.active = Some(store);
        Ok(())
    }

    /// Drop the open conversation and cancel every outstanding timer.
    pub fn close_conversation(&mut self) {
        self.scheduler.cancel_all();
        self.active = None;
    }

    /// Send into the open conversation. See `SendPipeline` for the
    /// validation, optimistic-insert and rollback contract.
    pub async fn send(&mut self, raw_text: &str) -> Result<Message, SendError> {
        let ChatEngine {
            active,
            index,
            scheduler,
            pipeline,
            ..
        } = self;
        let Some(store) = active.as_mut() else {
            return Err(SendError::NoActiveConversation);
        };
        pipeline.send(store, index, scheduler, raw_text).await
    }

    /// Apply one delivery timer tick. The tick is dropped when the message
    /// is no longer observed, already failed, or not in the expected
    /// predecessor state; an applied transition is reported to the server
    /// fire-and-forget.
    pub fn apply_delivery_tick(&mut self, tick: DeliveryTick) {
        let Some(store) = self.active.as_mut() else {
            self.scheduler.cancel(&tick.message_id);
            return;
        };
        let Some(current) = store.status_of(&tick.message_id) else {
            debug!(
                "Delivery tick for unobserved message {}, cancelling",
                tick.message_id
            );
            self.scheduler.cancel(&tick.message_id);
            return;
        };
        if current == DeliveryStatus::Failed {
            self.scheduler.cancel(&tick.message_id);
            return;
        }
        if current != tick.expected_predecessor() {
            debug!(
                "Dropping {:?} tick for message {} in state {:?}",
                tick.status, tick.message_id, current
            );
            return;
        }

        if store.update_status(&tick.message_id, tick.status).is_err() {
            return;
        }
        if let Some(message) = store.get(&tick.message_id) {
            let conversation_id = message.conversation_id.clone();
            let snapshot = message.clone();
            self.index.on_message_activity(&conversation_id, &snapshot);
        }
        if tick.status == DeliveryStatus::Read {
            // End of the chain; free the timer slot.
            self.scheduler.cancel(&tick.message_id);
        }
        self.report_status(tick.message_id, tick.status);
    }

    /// Advisory status report, spawned so it never blocks the engine.
    fn report_status(&self, message_id: String, status: DeliveryStatus) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.report_status(&message_id, status).await {
                warn!(
                    "Failed to report {:?} for message {}: {}",
                    status, message_id, e
                );
            }
        });
    }

    /// Start a conversation with a user and open it.
    pub async fn start_conversation(&mut self, peer_id: &str) -> Result<String, TransportError> {
        let conversation = self.transport.create_conversation(peer_id).await?;
        let id = conversation.id.clone();
        self.index.upsert(conversation);
        self.open_conversation(&id).await?;
        Ok(id)
    }

    /// Delete a conversation server-side and drop it from the index.
    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<(), TransportError> {
        self.transport.delete_conversation(conversation_id).await?;
        self.index.remove(conversation_id);
        if self.active_conversation_id() == Some(conversation_id) {
            self.close_conversation();
        }
        Ok(())
    }

    /// Toggle a conversation's pin server-side; the list re-sorts on the
    /// next snapshot.
    pub async fn toggle_pin(&mut self, conversation_id: &str) -> Result<bool, TransportError> {
        let pinned = self.transport.pin_conversation(conversation_id).await?;
        self.index.set_pinned(conversation_id, pinned);
        Ok(pinned)
    }

    /// Users available for the new-conversation dialog.
    pub async fn fetch_users(&self) -> Result<Vec<Participant>, TransportError> {
        self.transport.fetch_users().await
    }
}
