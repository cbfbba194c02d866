//! Thread reconstruction over a flat, filtered message set.
//!
//! [`group_messages`] is pure: it partitions messages into threads and
//! standalone messages. [`expand_threads`] is the optional step before it
//! that pulls in the in-window members of threads the selection touched.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::Result;
use crate::identity::DateRange;
use crate::models::{GroupedMessages, Message, MessageThread, ParentKind, ThreadKey};
use crate::store::MessageStore;

/// Merge in members of every thread the selection touches.
///
/// Candidate keys are each message's parent key and its own key. Only
/// members inside `range` are added; a thread root older than the window
/// stays out and its replies are later grouped as an orphaned thread.
pub async fn expand_threads<S>(
    store: &S,
    range: &DateRange,
    messages: Vec<Message>,
) -> Result<Vec<Message>>
where
    S: MessageStore + ?Sized,
{
    let mut present: HashSet<ThreadKey> = messages.iter().map(Message::key).collect();

    let mut candidates: Vec<ThreadKey> = Vec::new();
    let mut seen = HashSet::new();
    for message in &messages {
        for key in message.parent_key().into_iter().chain([message.key()]) {
            if seen.insert(key.clone()) {
                candidates.push(key);
            }
        }
    }

    let mut expanded = messages;
    let before = expanded.len();
    for key in candidates {
        let members = store.thread_members(&key.channel_id, &key.timestamp).await?;
        for member in members {
            if range.contains(member.created_at) && present.insert(member.key()) {
                expanded.push(member);
            }
        }
    }

    debug!(
        added = expanded.len() - before,
        total = expanded.len(),
        "Expanded thread members within window"
    );
    Ok(expanded)
}

/// Partition messages into threads and standalone messages.
///
/// Duplicates by `(channel_id, timestamp)` are dropped. Replies and
/// standalone messages come out ascending by `created_at`; threads are in
/// first-encounter order of their earliest reply.
pub fn group_messages(messages: Vec<Message>) -> GroupedMessages {
    let mut unique: Vec<Message> = Vec::with_capacity(messages.len());
    let mut seen = HashSet::new();
    for message in messages {
        if seen.insert(message.key()) {
            unique.push(message);
        }
    }
    unique.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    let distinct = unique.len();

    let referenced: HashSet<ThreadKey> = unique.iter().filter_map(Message::parent_key).collect();

    let mut reply_order: Vec<ThreadKey> = Vec::new();
    let mut replies: HashMap<ThreadKey, Vec<Message>> = HashMap::new();
    let mut parents: HashMap<ThreadKey, Message> = HashMap::new();
    let mut standalone: Vec<Message> = Vec::new();

    for message in unique {
        if let Some(parent) = message.parent_key() {
            let list = replies.entry(parent.clone()).or_insert_with(|| {
                reply_order.push(parent);
                Vec::new()
            });
            list.push(message);
        } else if referenced.contains(&message.key()) {
            parents.insert(message.key(), message);
        } else {
            standalone.push(message);
        }
    }

    let mut threads = Vec::with_capacity(reply_order.len());
    for key in reply_order {
        let Some(list) = replies.remove(&key) else {
            continue;
        };
        match parents.remove(&key) {
            Some(parent) => threads.push(MessageThread {
                thread_id: key.timestamp,
                message_count: 1 + list.len(),
                parent_message: parent,
                parent_kind: ParentKind::Original,
                replies: list,
            }),
            None => {
                let message_count = list.len();
                let mut rest = list.into_iter();
                let Some(first) = rest.next() else {
                    continue;
                };
                threads.push(MessageThread {
                    thread_id: key.timestamp,
                    message_count,
                    parent_message: first.promoted(),
                    parent_kind: ParentKind::Promoted,
                    replies: rest.collect(),
                });
            }
        }
    }

    // every recorded parent has replies and was consumed above
    debug_assert!(parents.is_empty());

    let total_message_count =
        threads.iter().map(|t| t.message_count).sum::<usize>() + standalone.len();
    debug_assert_eq!(
        total_message_count, distinct,
        "grouping dropped or duplicated messages"
    );

    GroupedMessages {
        threads,
        standalone_messages: standalone,
        total_message_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn msg(ts: i64, parent: Option<&str>) -> Message {
        Message {
            id: None,
            channel_id: "C1".into(),
            channel_name: "general".into(),
            sender_id: "U1".into(),
            sender_display_name: "alice".into(),
            text: format!("message {}", ts),
            timestamp: ts.to_string(),
            created_at: at(ts),
            thread_parent_timestamp: parent.map(String::from),
            permalink: String::new(),
            mention_classification: None,
        }
    }

    fn range(start: i64, end: i64) -> DateRange {
        DateRange::new(at(start), at(end)).unwrap()
    }

    fn timestamps(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.timestamp.as_str()).collect()
    }

    #[test]
    fn parent_with_replies_becomes_thread() {
        let input = vec![
            msg(100, None),
            msg(101, Some("100")),
            msg(102, Some("100")),
            msg(103, None),
        ];

        let grouped = group_messages(input);

        assert_eq!(grouped.threads.len(), 1);
        let thread = &grouped.threads[0];
        assert_eq!(thread.parent_message.timestamp, "100");
        assert_eq!(thread.parent_kind, ParentKind::Original);
        assert_eq!(timestamps(&thread.replies), vec!["101", "102"]);
        assert_eq!(thread.message_count, 3);
        assert_eq!(thread.thread_id, "100");
        assert_eq!(timestamps(&grouped.standalone_messages), vec!["103"]);
        assert_eq!(grouped.total_message_count, 4);
    }

    #[test]
    fn orphaned_replies_promote_the_earliest() {
        let input = vec![
            msg(202, Some("missing")),
            msg(200, Some("missing")),
            msg(201, Some("missing")),
        ];

        let grouped = group_messages(input);

        assert_eq!(grouped.threads.len(), 1);
        let thread = &grouped.threads[0];
        assert_eq!(thread.parent_message.timestamp, "200");
        assert!(thread.parent_message.thread_parent_timestamp.is_none());
        assert_eq!(thread.parent_kind, ParentKind::Promoted);
        assert_eq!(timestamps(&thread.replies), vec!["201", "202"]);
        assert_eq!(thread.message_count, 3);
        assert_eq!(thread.thread_id, "missing");
        assert!(grouped.standalone_messages.is_empty());
        assert_eq!(grouped.total_message_count, 3);
    }

    #[test]
    fn single_orphan_is_a_thread_without_replies() {
        let grouped = group_messages(vec![msg(300, Some("1"))]);

        assert_eq!(grouped.threads.len(), 1);
        assert!(grouped.threads[0].replies.is_empty());
        assert_eq!(grouped.threads[0].message_count, 1);
        assert!(grouped.standalone_messages.is_empty());
    }

    #[test]
    fn parent_without_replies_is_standalone() {
        let grouped = group_messages(vec![msg(10, None), msg(11, None)]);

        assert!(grouped.threads.is_empty());
        assert_eq!(timestamps(&grouped.standalone_messages), vec!["10", "11"]);
        assert_eq!(grouped.total_message_count, 2);
    }

    #[test]
    fn duplicates_are_counted_once() {
        let input = vec![
            msg(100, None),
            msg(101, Some("100")),
            msg(101, Some("100")),
            msg(100, None),
        ];

        let grouped = group_messages(input);

        assert_eq!(grouped.total_message_count, 2);
        assert_eq!(grouped.threads[0].replies.len(), 1);
    }

    #[test]
    fn threads_are_channel_scoped() {
        let mut other_channel_reply = msg(101, Some("100"));
        other_channel_reply.channel_id = "C2".into();

        let grouped = group_messages(vec![msg(100, None), other_channel_reply]);

        // the C1 root has no replies; the C2 reply is an orphan
        assert_eq!(grouped.threads.len(), 1);
        assert_eq!(grouped.threads[0].parent_kind, ParentKind::Promoted);
        assert_eq!(grouped.threads[0].parent_message.channel_id, "C2");
        assert_eq!(timestamps(&grouped.standalone_messages), vec!["100"]);
    }

    #[test]
    fn replies_are_sorted_regardless_of_input_order() {
        let input = vec![
            msg(105, Some("100")),
            msg(103, Some("100")),
            msg(100, None),
            msg(104, Some("100")),
        ];

        let grouped = group_messages(input);

        assert_eq!(timestamps(&grouped.threads[0].replies), vec!["103", "104", "105"]);
    }

    #[test]
    fn threads_follow_first_reply_order() {
        let input = vec![
            msg(1, None),
            msg(2, None),
            msg(3, Some("2")),
            msg(4, Some("1")),
            msg(5, Some("2")),
        ];

        let grouped = group_messages(input);

        let ids: Vec<&str> = grouped.threads.iter().map(|t| t.thread_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn partition_is_complete_for_mixed_input() {
        let mut input = Vec::new();
        for root in 0..20 {
            let root_ts = 1000 + root * 10;
            if root % 3 != 0 {
                input.push(msg(root_ts, None));
            }
            for reply in 1..(root % 4 + 1) {
                input.push(msg(root_ts + reply, Some(&root_ts.to_string())));
            }
        }
        let distinct = input.len();

        let grouped = group_messages(input);

        let sum: usize = grouped.threads.iter().map(|t| t.message_count).sum();
        assert_eq!(sum + grouped.standalone_messages.len(), distinct);
        assert_eq!(grouped.total_message_count, distinct);
        for thread in &grouped.threads {
            assert_eq!(thread.messages().count(), thread.message_count);
        }
    }

    #[test]
    fn grouping_is_idempotent() {
        let input = vec![
            msg(100, None),
            msg(101, Some("100")),
            msg(200, Some("150")),
            msg(300, None),
        ];

        assert_eq!(group_messages(input.clone()), group_messages(input));
    }

    #[test]
    fn empty_input_groups_to_nothing() {
        let grouped = group_messages(Vec::new());
        assert!(grouped.is_empty());
        assert!(grouped.threads.is_empty());
    }

    #[tokio::test]
    async fn expansion_pulls_in_window_members() {
        let store = MemoryStore::with_messages(vec![
            msg(100, None),
            msg(101, Some("100")),
            msg(102, Some("100")),
            msg(103, None),
        ]);
        let selected = vec![msg(101, Some("100")), msg(103, None)];

        let expanded = expand_threads(&store, &range(90, 110), selected).await.unwrap();
        let grouped = group_messages(expanded);

        assert_eq!(grouped.threads.len(), 1);
        assert_eq!(grouped.threads[0].parent_message.timestamp, "100");
        assert_eq!(timestamps(&grouped.threads[0].replies), vec!["101", "102"]);
        assert_eq!(timestamps(&grouped.standalone_messages), vec!["103"]);
        assert_eq!(grouped.total_message_count, 4);
    }

    #[tokio::test]
    async fn expansion_does_not_reach_outside_the_window() {
        let store = MemoryStore::with_messages(vec![
            msg(50, None),
            msg(95, Some("50")),
            msg(120, Some("50")),
        ]);
        let selected = vec![msg(95, Some("50"))];

        let expanded = expand_threads(&store, &range(90, 110), selected).await.unwrap();
        assert_eq!(timestamps(&expanded), vec!["95"]);

        let grouped = group_messages(expanded);
        assert_eq!(grouped.threads[0].parent_kind, ParentKind::Promoted);
        assert_eq!(grouped.threads[0].parent_message.timestamp, "95");
    }

    #[tokio::test]
    async fn expansion_finds_replies_to_selected_roots() {
        let store = MemoryStore::with_messages(vec![
            msg(100, None),
            msg(104, Some("100")),
        ]);

        let expanded = expand_threads(&store, &range(90, 110), vec![msg(100, None)])
            .await
            .unwrap();

        assert_eq!(expanded.len(), 2);
    }
}
