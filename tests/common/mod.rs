// Shared fixtures for the integration tests: canned data builders and an
// in-memory transport with failure injection and call counting.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use payphone::api::{TransportClient, TransportError};
use payphone::models::{Conversation, DeliveryStatus, LastMessage, Message, Participant};

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn participant(id: &str, name: &str) -> Participant {
    Participant {
        id: id.to_string(),
        name: name.to_string(),
        avatar: None,
        is_online: true,
        last_seen: None,
    }
}

pub fn conversation(id: &str, peer_name: &str, pinned: bool, created_secs: i64) -> Conversation {
    Conversation {
        id: id.to_string(),
        participant: participant(&format!("peer-{}", id), peer_name),
        last_message: None,
        is_pinned: pinned,
        created_at: ts(created_secs),
        unread_count: 0,
    }
}

pub fn message(
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    at_secs: i64,
    status: DeliveryStatus,
) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        text: format!("text of {}", id),
        sent_at: ts(at_secs),
        status,
    }
}

pub fn summary_of(message: &Message) -> LastMessage {
    LastMessage::from_message(message)
}

pub struct MockTransport {
    user_id: String,
    pub conversations: Mutex<Vec<Conversation>>,
    pub histories: Mutex<HashMap<String, Vec<Message>>>,
    pub users: Mutex<Vec<Participant>>,
    fail_sends: AtomicBool,
    send_counter: AtomicUsize,
    fetch_message_calls: AtomicUsize,
    pub reported: Mutex<Vec<(String, DeliveryStatus)>>,
}

impl MockTransport {
    pub fn new(user_id: &str) -> Self {
        MockTransport {
            user_id: user_id.to_string(),
            conversations: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            users: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            send_counter: AtomicUsize::new(0),
            fetch_message_calls: AtomicUsize::new(0),
            reported: Mutex::new(Vec::new()),
        }
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.conversations.lock().unwrap().push(conversation);
    }

    pub fn seed_history(&self, conversation_id: &str, history: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), history);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn message_fetches(&self) -> usize {
        self.fetch_message_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn create_conversation(&self, peer_id: &str) -> Result<Conversation, TransportError> {
        let created = Conversation {
            id: format!("conv-{}", peer_id),
            participant: participant(peer_id, &format!("user {}", peer_id)),
            last_message: None,
            is_pinned: false,
            created_at: Utc::now(),
            unread_count: 0,
        };
        self.conversations.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError> {
        self.conversations
            .lock()
            .unwrap()
            .retain(|c| c.id != conversation_id);
        Ok(())
    }

    async fn pin_conversation(&self, conversation_id: &str) -> Result<bool, TransportError> {
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or(TransportError::Api {
                status: 404,
                detail: "Chat not found".to_string(),
            })?;
        conversation.is_pinned = !conversation.is_pinned;
        Ok(conversation.is_pinned)
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        _offset: usize,
    ) -> Result<Vec<Message>, TransportError> {
        self.fetch_message_calls.fetch_add(1, Ordering::SeqCst);
        let histories = self.histories.lock().unwrap();
        let mut page = histories.get(conversation_id).cloned().unwrap_or_default();
        page.truncate(limit);
        Ok(page)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 503,
                detail: "service unavailable".to_string(),
            });
        }
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let confirmed = Message {
            id: format!("srv-{}", n),
            conversation_id: conversation_id.to_string(),
            sender_id: self.user_id.clone(),
            text: text.to_string(),
            sent_at: Utc::now(),
            status: DeliveryStatus::Sent,
        };
        self.histories
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .push(confirmed.clone());
        Ok(confirmed)
    }

    async fn report_status(
        &self,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<(), TransportError> {
        self.reported
            .lock()
            .unwrap()
            .push((message_id.to_string(), status));
        Ok(())
    }

    async fn fetch_users(&self) -> Result<Vec<Participant>, TransportError> {
        Ok(self.users.lock().unwrap().clone())
    }
}
