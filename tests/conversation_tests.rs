// Conversation list behavior through the engine: ordering, search, unread
// badges, pinning, and load coalescing.

mod common;
use common::{conversation, message, summary_of, MockTransport};

use std::sync::Arc;

use payphone::api::TransportClient;
use payphone::chat::ChatEngine;
use payphone::models::DeliveryStatus;

async fn engine_for(transport: &Arc<MockTransport>) -> ChatEngine {
    let client: Arc<dyn TransportClient> = transport.clone();
    let (mut engine, _ticks) = ChatEngine::new("me", client);
    engine.refresh_conversations().await.unwrap();
    engine
}

#[tokio::test]
async fn pinned_conversations_precede_recent_unpinned_ones() {
    let transport = Arc::new(MockTransport::new("me"));
    let mut c1 = conversation("c1", "Alice", true, 0);
    c1.last_message = Some(summary_of(&message(
        "m1",
        "c1",
        "me",
        5,
        DeliveryStatus::Read,
    )));
    let mut c2 = conversation("c2", "Bob", false, 0);
    c2.last_message = Some(summary_of(&message(
        "m2",
        "c2",
        "me",
        100,
        DeliveryStatus::Read,
    )));
    transport.add_conversation(c1);
    transport.add_conversation(c2);

    let engine = engine_for(&transport).await;
    let ids: Vec<String> = engine.conversations().into_iter().map(|c| c.id).collect();
    // The pin wins despite the much older activity.
    assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
}

#[tokio::test]
async fn empty_search_is_the_identity_on_the_ordered_list() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 30));
    transport.add_conversation(conversation("c2", "Bob", true, 10));
    transport.add_conversation(conversation("c3", "Carol", false, 20));

    let engine = engine_for(&transport).await;
    let ordered: Vec<String> = engine.conversations().into_iter().map(|c| c.id).collect();
    let filtered: Vec<String> = engine
        .filtered_conversations("")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ordered, filtered);
}

#[tokio::test]
async fn search_matches_names_case_insensitively() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice Anderson", false, 30));
    transport.add_conversation(conversation("c2", "Bob Alison", false, 20));
    transport.add_conversation(conversation("c3", "Carol", false, 10));

    let engine = engine_for(&transport).await;
    let hits: Vec<String> = engine
        .filtered_conversations("aLi")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(hits, vec!["c1".to_string(), "c2".to_string()]);
    assert!(engine.filtered_conversations("zzz").is_empty());
}

#[tokio::test]
async fn duplicate_open_requests_are_coalesced() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 0));
    transport.add_conversation(conversation("c2", "Bob", false, 0));

    let mut engine = engine_for(&transport).await;
    engine.open_conversation("c1").await.unwrap();
    engine.open_conversation("c1").await.unwrap();
    assert_eq!(transport.message_fetches(), 1);

    // Switching to another conversation and back does refetch.
    engine.open_conversation("c2").await.unwrap();
    engine.open_conversation("c1").await.unwrap();
    assert_eq!(transport.message_fetches(), 3);
}

#[tokio::test]
async fn send_updates_the_summary_in_the_same_turn() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 0));

    let mut engine = engine_for(&transport).await;
    engine.open_conversation("c1").await.unwrap();
    engine.send("hello").await.unwrap();

    let summary = engine.conversations()[0].last_message.clone().unwrap();
    assert_eq!(summary.text, "hello");
    assert_eq!(summary.sender_id, "me");
    assert_eq!(summary.status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn peer_activity_bumps_unread_until_the_conversation_is_opened() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 0));

    let mut engine = engine_for(&transport).await;
    assert_eq!(engine.unread_total(), 0);

    // The peer writes; the next refresh shows the newer summary.
    let incoming = message("m1", "c1", "peer-c1", 100, DeliveryStatus::Delivered);
    transport.conversations.lock().unwrap()[0].last_message = Some(summary_of(&incoming));
    transport.seed_history("c1", vec![incoming]);
    engine.refresh_conversations().await.unwrap();
    assert_eq!(engine.unread_total(), 1);

    // Replaying the same refresh must not double-count.
    engine.refresh_conversations().await.unwrap();
    assert_eq!(engine.unread_total(), 1);

    // Opening the conversation clears the badge.
    engine.open_conversation("c1").await.unwrap();
    assert_eq!(engine.unread_total(), 0);
}

#[tokio::test]
async fn own_activity_never_counts_as_unread() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 0));

    let mut engine = engine_for(&transport).await;
    let own = message("m1", "c1", "me", 100, DeliveryStatus::Sent);
    transport.conversations.lock().unwrap()[0].last_message = Some(summary_of(&own));
    engine.refresh_conversations().await.unwrap();
    assert_eq!(engine.unread_total(), 0);
}

#[tokio::test]
async fn toggling_a_pin_reorders_the_list() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 10));
    transport.add_conversation(conversation("c2", "Bob", false, 20));

    let mut engine = engine_for(&transport).await;
    let ids: Vec<String> = engine.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c2".to_string(), "c1".to_string()]);

    assert!(engine.toggle_pin("c1").await.unwrap());
    let ids: Vec<String> = engine.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);

    // Unpinning restores recency order.
    assert!(!engine.toggle_pin("c1").await.unwrap());
    let ids: Vec<String> = engine.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c2".to_string(), "c1".to_string()]);
}

#[tokio::test]
async fn deleting_the_open_conversation_closes_it() {
    let transport = Arc::new(MockTransport::new("me"));
    transport.add_conversation(conversation("c1", "Alice", false, 0));
    transport.add_conversation(conversation("c2", "Bob", false, 0));

    let mut engine = engine_for(&transport).await;
    engine.open_conversation("c1").await.unwrap();
    assert_eq!(engine.active_conversation_id(), Some("c1"));

    engine.delete_conversation("c1").await.unwrap();
    assert_eq!(engine.active_conversation_id(), None);
    let ids: Vec<String> = engine.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c2".to_string()]);
}

#[tokio::test]
async fn starting_a_conversation_opens_it() {
    let transport = Arc::new(MockTransport::new("me"));
    let mut engine = engine_for(&transport).await;

    let id = engine.start_conversation("u7").await.unwrap();
    assert_eq!(engine.active_conversation_id(), Some(id.as_str()));
    assert_eq!(engine.conversations().len(), 1);
    assert!(engine.messages().is_empty());
}
