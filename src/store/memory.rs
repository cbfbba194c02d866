//! In-memory store with the same query semantics as the MySQL backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{MessageStore, TopicStore};
use crate::error::{Error, Result};
use crate::identity::{DateRange, IdentityPredicate};
use crate::models::{Identity, Mention, Message, ThreadKey, Topic, TopicDocument};

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    index: HashMap<ThreadKey, usize>,
    mentions: HashMap<ThreadKey, Vec<Mention>>,
    identities: HashMap<String, Identity>,
    cursors: HashMap<String, String>,
    topics: Vec<Topic>,
    documents: HashMap<u64, TopicDocument>,
    topic_messages: HashSet<(u64, ThreadKey)>,
}

impl Inner {
    fn in_range<'a>(&'a self, range: &'a DateRange) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages
            .iter()
            .filter(move |m| range.contains(m.created_at))
    }
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with messages.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for message in messages {
                insert_or_update(&mut inner, message);
            }
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::StorageError("memory store lock poisoned".to_string()))
    }

    pub fn message_count(&self) -> usize {
        self.lock().map(|inner| inner.messages.len()).unwrap_or(0)
    }

    pub fn topic_message_keys(&self, topic_id: u64) -> Vec<ThreadKey> {
        let Ok(inner) = self.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<ThreadKey> = inner
            .topic_messages
            .iter()
            .filter(|(id, _)| *id == topic_id)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

fn insert_or_update(inner: &mut Inner, mut message: Message) {
    let key = message.key();
    match inner.index.get(&key) {
        Some(&position) => {
            let existing = &mut inner.messages[position];
            message.id = existing.id;
            if message.sender_display_name.trim().is_empty() {
                message.sender_display_name = existing.sender_display_name.clone();
            }
            *existing = message;
        }
        None => {
            message.id = Some(inner.messages.len() as u64 + 1);
            inner.index.insert(key, inner.messages.len());
            inner.messages.push(message);
        }
    }
}

fn sorted(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    messages
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn messages_in_range(&self, range: &DateRange) -> Result<Vec<Message>> {
        let inner = self.lock()?;
        Ok(sorted(inner.in_range(range).cloned().collect()))
    }

    async fn messages_by_sender(
        &self,
        range: &DateRange,
        senders: &[IdentityPredicate],
    ) -> Result<Vec<Message>> {
        if senders.is_empty() {
            return self.messages_in_range(range).await;
        }

        let inner = self.lock()?;
        let matched = inner
            .in_range(range)
            .filter(|m| {
                let sender = inner.identities.get(&m.sender_id);
                senders
                    .iter()
                    .any(|p| p.matches_sender(&m.sender_id, &m.sender_display_name, sender))
            })
            .cloned()
            .collect();
        Ok(sorted(matched))
    }

    async fn messages_by_mention_target(
        &self,
        range: &DateRange,
        targets: &[IdentityPredicate],
    ) -> Result<Vec<Message>> {
        if targets.is_empty() {
            return self.messages_in_range(range).await;
        }

        let inner = self.lock()?;
        let matched = inner
            .in_range(range)
            .filter(|m| {
                let mentioned: Vec<(&str, Option<&Identity>)> = inner
                    .mentions
                    .get(&m.key())
                    .map(|mentions| {
                        mentions
                            .iter()
                            .map(|mn| {
                                (mn.target_id.as_str(), inner.identities.get(&mn.target_id))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                targets.iter().any(|p| p.matches_mention(&m.text, &mentioned))
            })
            .cloned()
            .collect();
        Ok(sorted(matched))
    }

    async fn thread_members(
        &self,
        channel_id: &str,
        parent_timestamp: &str,
    ) -> Result<Vec<Message>> {
        let inner = self.lock()?;
        let members = inner
            .messages
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .filter(|m| match m.thread_parent_timestamp.as_deref() {
                Some(parent) => parent == parent_timestamp,
                None => m.timestamp == parent_timestamp,
            })
            .cloned()
            .collect();
        Ok(sorted(members))
    }

    async fn upsert_messages(&self, messages: &[Message]) -> Result<usize> {
        let mut inner = self.lock()?;
        for message in messages {
            insert_or_update(&mut inner, message.clone());
        }
        Ok(messages.len())
    }

    async fn replace_mentions(&self, message: &ThreadKey, mentions: &[Mention]) -> Result<()> {
        let mut inner = self.lock()?;
        if mentions.is_empty() {
            inner.mentions.remove(message);
        } else {
            inner.mentions.insert(message.clone(), mentions.to_vec());
        }
        Ok(())
    }

    async fn upsert_identities(&self, identities: &[Identity]) -> Result<usize> {
        let mut inner = self.lock()?;
        for identity in identities {
            inner
                .identities
                .insert(identity.id.clone(), identity.clone());
        }
        Ok(identities.len())
    }

    async fn identities(&self) -> Result<Vec<Identity>> {
        let inner = self.lock()?;
        let mut identities: Vec<Identity> = inner.identities.values().cloned().collect();
        identities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(identities)
    }

    async fn backfill_display_names(&self) -> Result<u64> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let mut updated = 0;
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.sender_display_name.trim().is_empty())
        {
            if let Some(identity) = inner.identities.get(&message.sender_id) {
                message.sender_display_name = identity.preferred_name().to_string();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn crawl_cursor(&self, channel_id: &str) -> Result<Option<String>> {
        Ok(self.lock()?.cursors.get(channel_id).cloned())
    }

    async fn set_crawl_cursor(&self, channel_id: &str, latest_timestamp: &str) -> Result<()> {
        self.lock()?
            .cursors
            .insert(channel_id.to_string(), latest_timestamp.to_string());
        Ok(())
    }
}

#[async_trait]
impl TopicStore for MemoryStore {
    async fn upsert_topic(&self, name: &str, description: &str) -> Result<Topic> {
        let mut inner = self.lock()?;
        let now = Utc::now();

        // names are unique case-insensitively, as under the MySQL collation
        let folded = name.to_lowercase();
        if let Some(topic) = inner
            .topics
            .iter_mut()
            .find(|t| t.name.to_lowercase() == folded)
        {
            topic.description = description.to_string();
            topic.updated_at = now;
            return Ok(topic.clone());
        }

        let topic = Topic {
            id: inner.topics.len() as u64 + 1,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        inner.topics.push(topic.clone());
        Ok(topic)
    }

    async fn topics(&self) -> Result<Vec<Topic>> {
        Ok(self.lock()?.topics.clone())
    }

    async fn topic_document(&self, topic_id: u64) -> Result<Option<TopicDocument>> {
        Ok(self.lock()?.documents.get(&topic_id).cloned())
    }

    async fn upsert_topic_document(&self, document: &TopicDocument) -> Result<()> {
        self.lock()?
            .documents
            .insert(document.topic_id, document.clone());
        Ok(())
    }

    async fn add_topic_messages(&self, topic_id: u64, messages: &[ThreadKey]) -> Result<()> {
        let mut inner = self.lock()?;
        for key in messages {
            inner.topic_messages.insert((topic_id, key.clone()));
        }
        Ok(())
    }
}
