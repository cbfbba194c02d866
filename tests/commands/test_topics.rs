//! Tests for topics command

use slack_knowledge::commands::topics;
use slack_knowledge::{MemoryStore, TopicStore};

#[tokio::test]
async fn test_topics_empty_store() {
    let store = MemoryStore::new();
    assert!(topics::list(&store).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_topics_upsert_keeps_single_row() {
    let store = MemoryStore::new();
    store.upsert_topic("On-call", "rota").await.unwrap();
    store.upsert_topic("On-call", "rota and escalation").await.unwrap();

    let lines = topics::list(&store).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("On-call"));
}
