//! Message persistence.
//!
//! Two traits split the relational store by concern:
//! - [`MessageStore`] – crawled messages, mentions, the user/group directory,
//!   and the four read queries the grouping engine depends on
//! - [`TopicStore`] – topics, their documents and message membership
//!
//! [`MySqlStore`] is the production backend; [`MemoryStore`] has the same
//! query semantics and backs tests and offline runs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::{DateRange, IdentityPredicate};
use crate::models::{Identity, Mention, Message, ThreadKey, Topic, TopicDocument};

pub mod memory;
pub mod migrations;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages with `created_at` in the range, ascending.
    async fn messages_in_range(&self, range: &DateRange) -> Result<Vec<Message>>;

    /// Messages in the range authored by any of the given identities.
    /// An empty predicate list returns the whole range.
    async fn messages_by_sender(
        &self,
        range: &DateRange,
        senders: &[IdentityPredicate],
    ) -> Result<Vec<Message>>;

    /// Messages in the range mentioning any of the given identities, either
    /// through the mention relation or literally in the text.
    /// An empty predicate list returns the whole range.
    async fn messages_by_mention_target(
        &self,
        range: &DateRange,
        targets: &[IdentityPredicate],
    ) -> Result<Vec<Message>>;

    /// The thread root (if stored) and every reply to it, ascending,
    /// regardless of date.
    async fn thread_members(&self, channel_id: &str, parent_timestamp: &str)
        -> Result<Vec<Message>>;

    /// Insert or update messages keyed by `(channel_id, timestamp)`.
    /// A blank display name never overwrites a known one.
    async fn upsert_messages(&self, messages: &[Message]) -> Result<usize>;

    /// Replace the mention rows of one message.
    async fn replace_mentions(&self, message: &ThreadKey, mentions: &[Mention]) -> Result<()>;

    async fn upsert_identities(&self, identities: &[Identity]) -> Result<usize>;

    async fn identities(&self) -> Result<Vec<Identity>>;

    /// Fill blank sender display names from the directory.
    async fn backfill_display_names(&self) -> Result<u64>;

    /// Latest crawled `ts` for a channel.
    async fn crawl_cursor(&self, channel_id: &str) -> Result<Option<String>>;

    async fn set_crawl_cursor(&self, channel_id: &str, latest_timestamp: &str) -> Result<()>;
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Create the topic or update the description of the existing one.
    async fn upsert_topic(&self, name: &str, description: &str) -> Result<Topic>;

    async fn topics(&self) -> Result<Vec<Topic>>;

    async fn topic_document(&self, topic_id: u64) -> Result<Option<TopicDocument>>;

    async fn upsert_topic_document(&self, document: &TopicDocument) -> Result<()>;

    async fn add_topic_messages(&self, topic_id: u64, messages: &[ThreadKey]) -> Result<()>;
}

/// Directory lookup used for name resolution and rendering.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    by_id: HashMap<String, Identity>,
}

impl Directory {
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            by_id: identities
                .into_iter()
                .map(|identity| (identity.id.clone(), identity))
                .collect(),
        }
    }

    pub async fn load<S: MessageStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(Self::new(store.identities().await?))
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Escape `%`, `_` and `\` for use inside a `LIKE` pattern.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
