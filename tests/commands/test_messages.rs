//! Tests for messages command

use chrono::{TimeZone, Utc};
use slack_knowledge::commands::{messages, Selection};
use slack_knowledge::error::Error;
use slack_knowledge::models::{Identity, Message, MentionKind};
use slack_knowledge::{MemoryStore, MessageStore};

// 2024-03-04 09:00:00 UTC
const MONDAY: i64 = 1_709_542_800;

fn message(offset: i64, sender: &str, text: &str, parent: Option<i64>) -> Message {
    let ts = MONDAY + offset;
    Message {
        id: None,
        channel_id: "C0ENG".to_string(),
        channel_name: "eng".to_string(),
        sender_id: sender.to_string(),
        sender_display_name: String::new(),
        text: text.to_string(),
        timestamp: format!("{}.000100", ts),
        created_at: Utc.timestamp_opt(ts, 0).unwrap(),
        thread_parent_timestamp: parent.map(|p| format!("{}.000100", MONDAY + p)),
        permalink: String::new(),
        mention_classification: None,
    }
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::with_messages(vec![
        message(0, "U0ALICE", "who owns the billing service?", None),
        message(60, "U0BOB", "<@U0ALICE> that's us", Some(0)),
        message(120, "U0CAROL", "standup moved to 10", None),
    ]);
    store
        .upsert_identities(&[
            Identity {
                id: "U0ALICE".to_string(),
                kind: MentionKind::User,
                name: "alice".to_string(),
                display_name: "Alice".to_string(),
                real_name: String::new(),
            },
            Identity {
                id: "U0BOB".to_string(),
                kind: MentionKind::User,
                name: "bob".to_string(),
                display_name: "Bob".to_string(),
                real_name: String::new(),
            },
        ])
        .await
        .unwrap();
    store
}

fn monday() -> Selection {
    Selection {
        start: "2024-03-04".to_string(),
        end: "2024-03-04".to_string(),
        ..Selection::default()
    }
}

#[tokio::test]
async fn test_messages_resolves_mentions_to_names() {
    let store = seeded_store().await;
    let markdown = messages::render(&store, &monday()).await.unwrap();

    assert!(markdown.contains("#eng"));
    assert!(markdown.contains("@Alice that's us"));
    assert!(markdown.contains("standup moved to 10"));
}

#[tokio::test]
async fn test_messages_sender_filter_by_name() {
    let store = seeded_store().await;
    let selection = Selection {
        senders: vec!["@bob".to_string()],
        ..monday()
    };

    let markdown = messages::render(&store, &selection).await.unwrap();
    assert!(markdown.contains("that's us"));
    assert!(!markdown.contains("standup moved"));
}

#[tokio::test]
async fn test_messages_empty_window() {
    let store = seeded_store().await;
    let selection = Selection {
        start: "2023-01-01".to_string(),
        end: "2023-01-02".to_string(),
        ..Selection::default()
    };

    let markdown = messages::render(&store, &selection).await.unwrap();
    assert!(markdown.contains("_No messages in this window._"));
}

#[tokio::test]
async fn test_messages_rejects_malformed_sender() {
    let store = seeded_store().await;
    let selection = Selection {
        senders: vec!["bob smith!".to_string()],
        ..monday()
    };

    let err = messages::render(&store, &selection).await.unwrap_err();
    assert!(matches!(err, Error::MalformedIdentityReference { .. }));
    assert!(err.is_usage_error());
}
