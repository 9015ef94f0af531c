// Server API surface consumed by the chat engine.
//
// The engine only ever sees the `TransportClient` contract; the reqwest
// implementation lives in `http.rs`.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Conversation, DeliveryStatus, Message, Participant};

pub mod http;

pub use http::HttpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server rejected the request ({status}): {detail}")]
    Api { status: u16, detail: String },
    #[error("session expired or invalid")]
    Unauthorized,
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    /// All conversations the current user participates in.
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, TransportError>;

    /// Start (or fail on an already existing) one-to-one conversation.
    async fn create_conversation(&self, peer_id: &str) -> Result<Conversation, TransportError>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError>;

    /// Toggle the pin flag server-side; returns the new pinned state.
    async fn pin_conversation(&self, conversation_id: &str) -> Result<bool, TransportError>;

    /// A page of history, oldest first.
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, TransportError>;

    /// Submit a message; the returned `Message` carries the server-assigned id.
    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message, TransportError>;

    /// Advisory status report. The engine fires this and forgets it; a
    /// failure is logged, never propagated.
    async fn report_status(
        &self,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<(), TransportError>;

    /// Registered users, for the new-conversation dialog.
    async fn fetch_users(&self) -> Result<Vec<Participant>, TransportError>;
}
