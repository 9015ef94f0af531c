use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The peer on the other side of a one-to-one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// Denormalized copy of a conversation's most recent message, kept on the
/// conversation itself so the list view never has to touch message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl LastMessage {
    pub fn from_message(message: &Message) -> Self {
        LastMessage {
            text: message.text.clone(),
            sender_id: message.sender_id.clone(),
            sent_at: message.sent_at,
            status: message.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant: Participant,
    pub last_message: Option<LastMessage>,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub unread_count: u32,
}

impl Conversation {
    /// Timestamp used for list ordering: last activity if any, else creation.
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.sent_at)
            .unwrap_or(self.created_at)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending = 0,   // Optimistically inserted, not yet confirmed by the server
    Sent = 1,      // Accepted by the server
    Delivered = 2, // Delivered to the recipient's device
    Read = 3,      // Read by the recipient
    Failed = 4,    // Send failed; retrying requires a fresh message
}

impl DeliveryStatus {
    /// Position in the delivery chain. `Failed` sits outside the chain and is
    /// handled separately.
    fn rank(self) -> u8 {
        self as u8
    }

    /// `Read` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Read | DeliveryStatus::Failed)
    }

    /// Whether moving from `self` to `next` goes forward through the delivery
    /// chain. Regressions and transitions out of a terminal state are
    /// rejected; `Failed` is reachable from every non-terminal state.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        if self.is_terminal() || next == self {
            return false;
        }
        if next == DeliveryStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }
}
