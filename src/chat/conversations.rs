// Conversation list state: the index of known conversations with their
// cached last-message summaries, plus the search filter over it.

use std::cmp::Ordering;

use log::debug;

use crate::models::{Conversation, LastMessage, Message};

/// Pinned conversations first, then most recent activity, id as the final
/// tiebreak so the order is total and deterministic.
fn compare(a: &Conversation, b: &Conversation) -> Ordering {
    b.is_pinned
        .cmp(&a.is_pinned)
        .then_with(|| b.effective_timestamp().cmp(&a.effective_timestamp()))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct ConversationIndex {
    conversations: Vec<Conversation>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        ConversationIndex {
            conversations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Insert or refresh a conversation. Server-side refreshes do not carry
    /// the locally-tracked unread count, and may lag behind an optimistic
    /// summary, so both survive the replace.
    pub fn upsert(&mut self, mut conversation: Conversation) {
        if let Some(existing) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            conversation.unread_count = conversation.unread_count.max(existing.unread_count);
            let incoming_is_stale = match (&existing.last_message, &conversation.last_message) {
                (Some(current), Some(incoming)) => incoming.sent_at < current.sent_at,
                (Some(_), None) => true,
                _ => false,
            };
            if incoming_is_stale {
                conversation.last_message = existing.last_message.clone();
            }
            *existing = conversation;
        } else {
            self.conversations.push(conversation);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        let pos = self.conversations.iter().position(|c| c.id == id)?;
        Some(self.conversations.remove(pos))
    }

    /// Refresh the last-message summary for message activity in a
    /// conversation. Applies when the message is at least as recent as the
    /// cached summary, so a status update carrying the same timestamp still
    /// refreshes the summary's status field.
    pub fn on_message_activity(&mut self, conversation_id: &str, message: &Message) {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        else {
            debug!(
                "Message activity for unknown conversation {}",
                conversation_id
            );
            return;
        };
        let applies = conversation
            .last_message
            .as_ref()
            .map(|current| message.sent_at >= current.sent_at)
            .unwrap_or(true);
        if applies {
            conversation.last_message = Some(LastMessage::from_message(message));
        }
    }

    pub fn set_pinned(&mut self, id: &str, pinned: bool) {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.is_pinned = pinned;
        }
    }

    pub fn bump_unread(&mut self, id: &str) {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.unread_count += 1;
        }
    }

    pub fn clear_unread(&mut self, id: &str) {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.unread_count = 0;
        }
    }

    pub fn unread_total(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    /// Ordered snapshot of every known conversation. The sort is re-run on
    /// each call; no stale ordering can leak to the list view.
    pub fn all(&self) -> Vec<Conversation> {
        let mut snapshot = self.conversations.clone();
        snapshot.sort_by(compare);
        snapshot
    }
}

/// Case-insensitive participant-name search. An empty query is the identity:
/// the input comes back in the order the index produced, untouched.
pub fn filter_conversations(conversations: &[Conversation], query: &str) -> Vec<Conversation> {
    if query.is_empty() {
        return conversations.to_vec();
    }
    let needle = query.to_lowercase();
    conversations
        .iter()
        .filter(|c| c.participant.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryStatus, Participant};
    use chrono::{TimeZone, Utc};

    fn participant(id: &str, name: &str) -> Participant {
        Participant {
            id: id.to_string(),
            name: name.to_string(),
            avatar: None,
            is_online: false,
            last_seen: None,
        }
    }

    fn conversation(id: &str, name: &str, pinned: bool, created_secs: i64) -> Conversation {
        Conversation {
            id: id.to_string(),
            participant: participant(&format!("u-{}", id), name),
            last_message: None,
            is_pinned: pinned,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            unread_count: 0,
        }
    }

    fn activity(conversation_id: &str, at_secs: i64, status: DeliveryStatus) -> Message {
        Message {
            id: format!("m-{}", at_secs),
            conversation_id: conversation_id.to_string(),
            sender_id: "peer".to_string(),
            text: "hi".to_string(),
            sent_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
            status,
        }
    }

    #[test]
    fn pinned_conversations_win_despite_older_activity() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", true, 0));
        index.upsert(conversation("c2", "Bob", false, 0));
        index.on_message_activity("c1", &activity("c1", 5, DeliveryStatus::Read));
        index.on_message_activity("c2", &activity("c2", 100, DeliveryStatus::Read));

        let ids: Vec<String> = index.all().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn recency_orders_within_each_group() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", false, 10));
        index.upsert(conversation("c2", "Bob", false, 20));
        index.upsert(conversation("c3", "Carol", false, 15));
        index.on_message_activity("c1", &activity("c1", 500, DeliveryStatus::Read));

        let ids: Vec<String> = index.all().into_iter().map(|c| c.id).collect();
        // c1 has the newest activity; c2 and c3 fall back to creation time.
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn ordering_is_deterministic_on_timestamp_ties() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c2", "Bob", false, 10));
        index.upsert(conversation("c1", "Alice", false, 10));

        let first: Vec<String> = index.all().into_iter().map(|c| c.id).collect();
        let second: Vec<String> = index.all().into_iter().map(|c| c.id).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["c1", "c2"]);
    }

    #[test]
    fn summary_only_advances_in_time() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", false, 0));
        index.on_message_activity("c1", &activity("c1", 100, DeliveryStatus::Sent));
        index.on_message_activity("c1", &activity("c1", 50, DeliveryStatus::Read));

        let summary = index.get("c1").unwrap().last_message.clone().unwrap();
        assert_eq!(summary.sent_at, Utc.timestamp_opt(100, 0).unwrap());
        assert_eq!(summary.status, DeliveryStatus::Sent);
    }

    #[test]
    fn equal_timestamp_activity_refreshes_the_status() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", false, 0));
        index.on_message_activity("c1", &activity("c1", 100, DeliveryStatus::Sent));
        index.on_message_activity("c1", &activity("c1", 100, DeliveryStatus::Delivered));

        let summary = index.get("c1").unwrap().last_message.clone().unwrap();
        assert_eq!(summary.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn upsert_keeps_local_unread_and_fresher_summary() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", false, 0));
        index.bump_unread("c1");
        index.bump_unread("c1");
        index.on_message_activity("c1", &activity("c1", 200, DeliveryStatus::Pending));

        // A server refresh that lags behind the optimistic state.
        let mut stale = conversation("c1", "Alice", true, 0);
        stale.last_message = Some(LastMessage::from_message(&activity(
            "c1",
            150,
            DeliveryStatus::Read,
        )));
        index.upsert(stale);

        let conversation = index.get("c1").unwrap();
        assert!(conversation.is_pinned);
        assert_eq!(conversation.unread_count, 2);
        assert_eq!(
            conversation.last_message.as_ref().unwrap().sent_at,
            Utc.timestamp_opt(200, 0).unwrap()
        );
    }

    #[test]
    fn empty_query_is_the_identity() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", false, 30));
        index.upsert(conversation("c2", "Bob", true, 10));
        index.upsert(conversation("c3", "Carol", false, 20));

        let ordered = index.all();
        let filtered = filter_conversations(&ordered, "");
        let a: Vec<&str> = ordered.iter().map(|c| c.id.as_str()).collect();
        let b: Vec<&str> = filtered.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn search_is_case_insensitive_substring_and_keeps_order() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice Anderson", false, 30));
        index.upsert(conversation("c2", "Bob Alison", false, 20));
        index.upsert(conversation("c3", "Carol", false, 10));

        let filtered = filter_conversations(&index.all(), "ALi");
        let ids: Vec<&str> = filtered.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn unread_counters_accumulate_and_clear() {
        let mut index = ConversationIndex::new();
        index.upsert(conversation("c1", "Alice", false, 0));
        index.upsert(conversation("c2", "Bob", false, 0));
        index.bump_unread("c1");
        index.bump_unread("c1");
        index.bump_unread("c2");
        assert_eq!(index.unread_total(), 3);

        index.clear_unread("c1");
        assert_eq!(index.get("c1").unwrap().unread_count, 0);
        assert_eq!(index.unread_total(), 1);
    }
}
