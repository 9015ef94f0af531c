// Message history for a single open conversation.
//
// Messages are kept in arrival order with an id lookup table; the sorted view
// is re-derived on read so callers never hold a mutable reference into the
// store.

use std::collections::HashMap;

use log::debug;
use thiserror::Error;

use crate::models::{DeliveryStatus, Message};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no message with id {0} in this conversation")]
    NotFound(String),
}

pub struct MessageStore {
    conversation_id: String,
    messages: Vec<Message>,
    // Message id -> slot in `messages`. `replace_id` renames through this
    // table instead of rekeying a sorted collection.
    slots: HashMap<String, usize>,
}

impl MessageStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        MessageStore {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.slots.get(id).map(|&slot| &self.messages[slot])
    }

    pub fn status_of(&self, id: &str) -> Option<DeliveryStatus> {
        self.get(id).map(|m| m.status)
    }

    /// Insert a message. A message whose id is already tracked is treated as
    /// a replay of the same message and only upgrades the stored status.
    pub fn append(&mut self, message: Message) {
        if let Some(&slot) = self.slots.get(&message.id) {
            let existing = &mut self.messages[slot];
            if existing.status.can_advance_to(message.status) {
                existing.status = message.status;
            }
            return;
        }
        self.slots.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
    }

    /// Bulk insert, used when loading history from the server.
    pub fn load(&mut self, history: Vec<Message>) {
        for message in history {
            self.append(message);
        }
    }

    /// Advance a message's delivery status. Regressions and transitions out
    /// of a terminal state are kept as no-ops; a missing id is an error the
    /// caller is expected to swallow (the conversation may have switched
    /// away already).
    pub fn update_status(&mut self, id: &str, status: DeliveryStatus) -> Result<(), StoreError> {
        let slot = *self
            .slots
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let message = &mut self.messages[slot];
        if message.status.can_advance_to(status) {
            message.status = status;
        } else {
            debug!(
                "Ignoring status transition {:?} -> {:?} for message {}",
                message.status, status, id
            );
        }
        Ok(())
    }

    /// Swap a locally-generated temporary id for the server-assigned one.
    /// Called once per message, right after the transport confirms the send;
    /// the temporary id is invalid for lookups afterwards.
    pub fn replace_id(&mut self, temp_id: &str, server_id: &str) {
        let Some(slot) = self.slots.remove(temp_id) else {
            debug!("replace_id: temporary id {} is not tracked", temp_id);
            return;
        };
        if self.slots.contains_key(server_id) {
            // The server copy arrived before the confirmation; drop the
            // optimistic duplicate instead of tracking the same message twice.
            debug!(
                "replace_id: {} already tracked, dropping temporary copy",
                server_id
            );
            self.messages.remove(slot);
            for other in self.slots.values_mut() {
                if *other > slot {
                    *other -= 1;
                }
            }
            return;
        }
        self.messages[slot].id = server_id.to_string();
        self.slots.insert(server_id.to_string(), slot);
    }

    /// The most recently sent message, later arrival winning timestamp ties.
    /// This is what feeds the conversation's last-message summary.
    pub fn latest(&self) -> Option<&Message> {
        let mut best: Option<&Message> = None;
        for message in &self.messages {
            if best.map_or(true, |b| message.sent_at >= b.sent_at) {
                best = Some(message);
            }
        }
        best
    }

    /// Snapshot of the history sorted by send time, insertion order breaking
    /// ties. Re-derived on every call.
    pub fn view(&self) -> Vec<Message> {
        let mut view = self.messages.clone();
        view.sort_by_key(|m| m.sent_at);
        view
    }
}
