//! Filter composition: validate, resolve, pick a store query, group.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::Result;
use crate::grouping::{expand_threads, group_messages};
use crate::identity::{resolve_references, validate_identity_references};
use crate::models::{GroupedMessages, Message, MessageFilter, ThreadKey};
use crate::store::MessageStore;

/// Messages selected by `filter`, ascending by `created_at`.
///
/// Identity references are validated before the store is touched. With both
/// sender and mention references the result is the intersection of the two
/// queries.
pub async fn select_messages<S>(store: &S, filter: &MessageFilter) -> Result<Vec<Message>>
where
    S: MessageStore + ?Sized,
{
    validate_identity_references(&filter.sender_contains)?;
    validate_identity_references(&filter.mention_targets)?;

    let senders = resolve_references(&filter.sender_contains);
    let targets = resolve_references(&filter.mention_targets);
    let range = &filter.range;

    let messages = match (senders.is_empty(), targets.is_empty()) {
        (true, true) => store.messages_in_range(range).await?,
        (false, true) => store.messages_by_sender(range, &senders).await?,
        (true, false) => store.messages_by_mention_target(range, &targets).await?,
        (false, false) => {
            let mentioning: HashSet<ThreadKey> = store
                .messages_by_mention_target(range, &targets)
                .await?
                .iter()
                .map(Message::key)
                .collect();
            store
                .messages_by_sender(range, &senders)
                .await?
                .into_iter()
                .filter(|m| mentioning.contains(&m.key()))
                .collect()
        }
    };

    debug!(
        senders = senders.len(),
        mentions = targets.len(),
        selected = messages.len(),
        "Selected messages"
    );
    Ok(messages)
}

/// Select, optionally expand threads, then group.
pub async fn fetch_grouped<S>(store: &S, filter: &MessageFilter) -> Result<GroupedMessages>
where
    S: MessageStore + ?Sized,
{
    let mut messages = select_messages(store, filter).await?;
    if filter.include_threads {
        messages = expand_threads(store, &filter.range, messages).await?;
    }

    let grouped = group_messages(messages);
    info!(
        threads = grouped.threads.len(),
        standalone = grouped.standalone_messages.len(),
        total = grouped.total_message_count,
        "Grouped messages"
    );
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::identity::DateRange;
    use crate::models::{Identity, Mention, MentionKind};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn msg(ts: i64, sender: &str, text: &str, parent: Option<&str>) -> Message {
        Message {
            id: None,
            channel_id: "C1".into(),
            channel_name: "general".into(),
            sender_id: sender.into(),
            sender_display_name: String::new(),
            text: text.into(),
            timestamp: ts.to_string(),
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            thread_parent_timestamp: parent.map(String::from),
            permalink: String::new(),
            mention_classification: None,
        }
    }

    fn window() -> DateRange {
        DateRange::new(
            Utc.timestamp_opt(90, 0).unwrap(),
            Utc.timestamp_opt(110, 0).unwrap(),
        )
        .unwrap()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::with_messages(vec![
            msg(80, "U1", "too early", None),
            msg(100, "U1", "root", None),
            msg(101, "U2", "reply <@U1>", Some("100")),
            msg(102, "U3", "another reply", Some("100")),
            msg(103, "U2", "hi @alice", None),
            msg(120, "U2", "too late <@U1>", None),
        ]);
        store
            .upsert_identities(&[Identity {
                id: "U1".into(),
                kind: MentionKind::User,
                name: "alice".into(),
                display_name: "Alice".into(),
                real_name: "Alice Liddell".into(),
            }])
            .await
            .unwrap();
        store
            .replace_mentions(
                &ThreadKey::new("C1", "101"),
                &[Mention {
                    channel_id: "C1".into(),
                    message_timestamp: "101".into(),
                    target_id: "U1".into(),
                    target_kind: MentionKind::User,
                }],
            )
            .await
            .unwrap();
        store
    }

    fn stamps(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.timestamp.as_str()).collect()
    }

    #[tokio::test]
    async fn range_only_returns_window() {
        let store = seeded().await;
        let selected = select_messages(&store, &MessageFilter::new(window()))
            .await
            .unwrap();

        assert_eq!(stamps(&selected), vec!["100", "101", "102", "103"]);
        assert!(selected.iter().all(|m| window().contains(m.created_at)));
    }

    #[tokio::test]
    async fn sender_by_name_uses_directory() {
        let store = seeded().await;
        let filter = MessageFilter::new(window()).with_senders(["@alice"]);

        let selected = select_messages(&store, &filter).await.unwrap();
        assert_eq!(stamps(&selected), vec!["100"]);
    }

    #[tokio::test]
    async fn mention_matches_relation_and_literal() {
        let store = seeded().await;
        let filter = MessageFilter::new(window()).with_mentions(["alice"]);

        let selected = select_messages(&store, &filter).await.unwrap();
        assert_eq!(stamps(&selected), vec!["101", "103"]);
    }

    #[tokio::test]
    async fn both_filters_intersect() {
        let store = seeded().await;
        let filter = MessageFilter::new(window())
            .with_senders(["U2"])
            .with_mentions(["<@U1>"]);

        let selected = select_messages(&store, &filter).await.unwrap();
        assert_eq!(stamps(&selected), vec!["101"]);
    }

    #[tokio::test]
    async fn malformed_reference_aborts_before_querying() {
        let store = seeded().await;
        let filter = MessageFilter::new(window()).with_senders(["not a name!"]);

        let err = select_messages(&store, &filter).await.unwrap_err();
        assert!(matches!(err, Error::MalformedIdentityReference { .. }));
    }

    #[tokio::test]
    async fn include_threads_completes_the_thread() {
        let store = seeded().await;
        let filter = MessageFilter::new(window())
            .with_senders(["U3"])
            .with_threads(true);

        let grouped = fetch_grouped(&store, &filter).await.unwrap();

        assert_eq!(grouped.threads.len(), 1);
        assert_eq!(grouped.threads[0].parent_message.timestamp, "100");
        assert_eq!(grouped.threads[0].replies.len(), 2);
        assert_eq!(grouped.total_message_count, 3);
    }

    #[tokio::test]
    async fn without_expansion_reply_is_orphaned() {
        let store = seeded().await;
        let filter = MessageFilter::new(window()).with_senders(["U3"]);

        let grouped = fetch_grouped(&store, &filter).await.unwrap();

        assert_eq!(grouped.threads.len(), 1);
        assert_eq!(grouped.threads[0].parent_message.timestamp, "102");
        assert_eq!(grouped.total_message_count, 1);
    }
}
