//! Core data types: persisted messages and identities, derived thread views,
//! and the filter that selects messages for grouping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::DateRange;

/// Which kind of identity a message mentions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    User,
    Group,
}

impl MentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionKind::User => "user",
            MentionKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MentionKind::User),
            "group" => Some(MentionKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for MentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crawled chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Surrogate key, assigned when persisted
    pub id: Option<u64>,
    pub channel_id: String,
    pub channel_name: String,
    pub sender_id: String,
    pub sender_display_name: String,
    /// Raw text, may contain `<@U..>` style markup
    pub text: String,
    /// Platform timestamp token (`ts`), opaque ordering key
    pub timestamp: String,
    /// Instant derived from `timestamp`, used for ranges and ordering
    pub created_at: DateTime<Utc>,
    /// Root timestamp of the thread this message replies to
    pub thread_parent_timestamp: Option<String>,
    pub permalink: String,
    pub mention_classification: Option<MentionKind>,
}

impl Message {
    /// Key that identifies this message within the whole store.
    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(&self.channel_id, &self.timestamp)
    }

    /// Key of the thread this message replies to, if it is a reply.
    pub fn parent_key(&self) -> Option<ThreadKey> {
        self.thread_parent_timestamp
            .as_deref()
            .map(|ts| ThreadKey::new(&self.channel_id, ts))
    }

    pub fn is_reply(&self) -> bool {
        self.thread_parent_timestamp.is_some()
    }

    /// Copy of this message with the thread link cleared.
    pub fn promoted(&self) -> Self {
        Self {
            thread_parent_timestamp: None,
            ..self.clone()
        }
    }
}

/// `(channel_id, timestamp)` pair; unique per message and per thread root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey {
    pub channel_id: String,
    pub timestamp: String,
}

impl ThreadKey {
    pub fn new(channel_id: &str, timestamp: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            timestamp: timestamp.to_string(),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.timestamp)
    }
}

/// Whether a thread's parent is the real root or a stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParentKind {
    Original,
    /// Earliest available reply standing in for a root outside the window
    Promoted,
}

/// A reconstructed conversation: a parent and its chronological replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageThread {
    pub parent_message: Message,
    pub parent_kind: ParentKind,
    pub replies: Vec<Message>,
    pub thread_id: String,
    pub message_count: usize,
}

impl MessageThread {
    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(&self.parent_message.channel_id, &self.thread_id)
    }

    /// Parent followed by replies.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        std::iter::once(&self.parent_message).chain(self.replies.iter())
    }
}

/// Output of the grouping engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupedMessages {
    pub threads: Vec<MessageThread>,
    pub standalone_messages: Vec<Message>,
    pub total_message_count: usize,
}

impl GroupedMessages {
    pub fn is_empty(&self) -> bool {
        self.total_message_count == 0
    }
}

/// Selection parameters for a grouping run.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFilter {
    pub range: DateRange,
    /// Match messages authored by any of these
    pub sender_contains: Vec<String>,
    /// Match messages mentioning any of these
    pub mention_targets: Vec<String>,
    /// Pull in in-window members of threads touched by the selection
    pub include_threads: bool,
}

impl MessageFilter {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            sender_contains: Vec::new(),
            mention_targets: Vec::new(),
            include_threads: false,
        }
    }

    pub fn with_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sender_contains = senders.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mentions<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mention_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threads(mut self, include_threads: bool) -> Self {
        self.include_threads = include_threads;
        self
    }
}

/// Persisted mention of a user or group by a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mention {
    pub channel_id: String,
    pub message_timestamp: String,
    pub target_id: String,
    pub target_kind: MentionKind,
}

/// A user or usergroup from the workspace directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub kind: MentionKind,
    /// Handle (`name` for users, `handle` for groups)
    pub name: String,
    pub display_name: String,
    pub real_name: String,
}

impl Identity {
    /// Best human-readable name.
    pub fn preferred_name(&self) -> &str {
        [&self.display_name, &self.real_name, &self.name]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map(String::as_str)
            .unwrap_or(&self.id)
    }

    /// Case-insensitive match against any of the stored names.
    pub fn matches_name(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        [&self.display_name, &self.real_name, &self.name]
            .into_iter()
            .any(|candidate| !candidate.is_empty() && candidate.to_lowercase() == wanted)
    }
}

/// Topic produced by clustering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topic {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Markdown document written for a topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDocument {
    pub topic_id: u64,
    pub path: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}
