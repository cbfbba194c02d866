//! MySQL backend.
//!
//! One pool per process run. Queries are assembled from small parameterised
//! clauses so the sender/mention predicates stay in step with the in-memory
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Params, Pool, TxOpts, Value};
use tracing::{debug, info};

use super::migrations::{self, AddColumn, Migration};
use super::{escape_like, MessageStore, TopicStore};
use crate::config::MySqlConfig;
use crate::error::{Error, Result};
use crate::identity::{DateRange, IdentityPredicate};
use crate::models::{Identity, Mention, MentionKind, Message, ThreadKey, Topic, TopicDocument};

const MESSAGE_COLUMNS: &str = "m.id, m.channel_id, m.channel_name, m.user_id, m.user_name, \
     m.text, m.ts, m.thread_ts, m.permalink, m.created_at, m.mention_type";

type MessageRow = (
    u64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    NaiveDateTime,
    Option<String>,
);

type TopicRow = (u64, String, String, NaiveDateTime, NaiveDateTime);

fn message_from_row(row: MessageRow) -> Message {
    let (
        id,
        channel_id,
        channel_name,
        sender_id,
        sender_display_name,
        text,
        timestamp,
        thread_parent_timestamp,
        permalink,
        created_at,
        mention_type,
    ) = row;

    Message {
        id: Some(id),
        channel_id,
        channel_name,
        sender_id,
        sender_display_name,
        text,
        timestamp,
        created_at: created_at.and_utc(),
        thread_parent_timestamp,
        permalink,
        mention_classification: mention_type.as_deref().and_then(MentionKind::parse),
    }
}

fn topic_from_row(row: TopicRow) -> Topic {
    let (id, name, description, created_at, updated_at) = row;
    Topic {
        id,
        name,
        description,
        created_at: created_at.and_utc(),
        updated_at: updated_at.and_utc(),
    }
}

fn naive(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.naive_utc()
}

/// SQL fragment with its positional parameters.
#[derive(Debug, Default)]
struct Clause {
    sql: String,
    params: Vec<Value>,
}

impl Clause {
    fn any_of(clauses: Vec<Clause>) -> Clause {
        if clauses.is_empty() {
            return Clause {
                sql: "0 = 1".to_string(),
                params: Vec::new(),
            };
        }
        let mut params = Vec::new();
        let parts: Vec<String> = clauses
            .into_iter()
            .map(|clause| {
                params.extend(clause.params);
                format!("({})", clause.sql)
            })
            .collect();
        Clause {
            sql: parts.join(" OR "),
            params,
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Name comparisons against an identity row aliased as `alias`.
fn identity_name_clauses(alias: &str, names: &[String]) -> Vec<Clause> {
    names
        .iter()
        .map(|name| Clause {
            sql: format!(
                "LOWER({a}.display_name) = LOWER(?) OR LOWER({a}.real_name) = LOWER(?) \
                 OR LOWER({a}.name) = LOWER(?)",
                a = alias
            ),
            params: vec![name.clone().into(), name.clone().into(), name.clone().into()],
        })
        .collect()
}

fn sender_clause(predicate: &IdentityPredicate) -> Clause {
    let mut clauses = Vec::new();
    if !predicate.ids.is_empty() {
        clauses.push(Clause {
            sql: format!("m.user_id IN ({})", placeholders(predicate.ids.len())),
            params: predicate.ids.iter().map(|id| id.clone().into()).collect(),
        });
    }
    for name in &predicate.names {
        clauses.push(Clause {
            sql: "m.user_name <> '' AND LOWER(m.user_name) = LOWER(?)".to_string(),
            params: vec![name.clone().into()],
        });
    }
    clauses.extend(identity_name_clauses("u", &predicate.names));
    Clause::any_of(clauses)
}

fn mention_clause(predicate: &IdentityPredicate) -> Clause {
    let mut relation = Vec::new();
    if !predicate.ids.is_empty() {
        relation.push(Clause {
            sql: format!("mn.target_id IN ({})", placeholders(predicate.ids.len())),
            params: predicate.ids.iter().map(|id| id.clone().into()).collect(),
        });
    }
    relation.extend(identity_name_clauses("t", &predicate.names));

    let mut clauses = Vec::new();
    if !relation.is_empty() {
        let inner = Clause::any_of(relation);
        clauses.push(Clause {
            sql: format!(
                "EXISTS (SELECT 1 FROM mentions mn LEFT JOIN identities t ON t.id = mn.target_id \
                 WHERE mn.channel_id = m.channel_id AND mn.message_ts = m.ts AND ({}))",
                inner.sql
            ),
            params: inner.params,
        });
    }
    for literal in &predicate.literals {
        clauses.push(Clause {
            sql: "LOWER(m.text) LIKE CONCAT('%', LOWER(?), '%')".to_string(),
            params: vec![escape_like(literal).into()],
        });
    }
    Clause::any_of(clauses)
}

/// Store backed by a MySQL connection pool.
#[derive(Clone)]
pub struct MySqlStore {
    pool: Pool,
}

impl MySqlStore {
    pub fn new(config: &MySqlConfig) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .db_name(Some(config.database.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()));

        info!(
            host = %config.host,
            database = %config.database,
            "Configured MySQL pool"
        );

        Self {
            pool: Pool::new(opts),
        }
    }

    /// Connect and bring the schema up to date.
    pub async fn open(config: &MySqlConfig) -> Result<Self> {
        let store = Self::new(config);
        store.migrate().await?;
        Ok(store)
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| Error::ConnectionError(e.to_string()))
    }

    /// Apply pending migrations, each in its own transaction.
    /// Returns the schema version afterwards.
    pub async fn migrate(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        conn.query_drop(migrations::SCHEMA_TABLE).await?;

        let current: Option<u32> = conn
            .query_first::<Option<u32>, _>("SELECT MAX(version) FROM schema_migrations")
            .await?
            .flatten();

        let pending = migrations::pending(current);
        if pending.is_empty() {
            debug!(version = current.unwrap_or(0), "Schema is up to date");
            return Ok(current.unwrap_or(0));
        }

        for migration in pending {
            info!(
                version = migration.version,
                "Applying migration: {}", migration.description
            );
            let mut tx = conn.start_transaction(TxOpts::default()).await?;
            match apply_migration(&mut tx, migration).await {
                Ok(()) => tx.commit().await?,
                Err(err) => {
                    tx.rollback().await.ok();
                    return Err(Error::MigrationError {
                        version: migration.version,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(migrations::latest_version())
    }

    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }

    async fn select_messages(&self, range: &DateRange, join: &str, filter: Clause) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages m {} WHERE m.created_at BETWEEN ? AND ? AND ({}) \
             ORDER BY m.created_at, m.ts",
            MESSAGE_COLUMNS, join, filter.sql
        );
        let mut params: Vec<Value> = vec![naive(range.start()).into(), naive(range.end()).into()];
        params.extend(filter.params);

        let mut conn = self.conn().await?;
        let messages = conn
            .exec_map(sql, Params::Positional(params), message_from_row)
            .await?;
        Ok(messages)
    }
}

async fn apply_migration(tx: &mut mysql_async::Transaction<'_>, migration: &Migration) -> Result<()> {
    for statement in migration.statements {
        tx.query_drop(*statement).await?;
    }
    for addition in migration.columns {
        let present: Option<u64> = tx
            .exec_first(AddColumn::EXISTS_QUERY, (addition.table, addition.column))
            .await?;
        if present.unwrap_or(0) > 0 {
            debug!(table = addition.table, column = addition.column, "Column already present");
            continue;
        }
        tx.query_drop(addition.alter_sql()).await?;
    }
    tx.exec_drop(
        "INSERT INTO schema_migrations (version, description) VALUES (?, ?)",
        (migration.version, migration.description),
    )
    .await?;
    Ok(())
}

#[async_trait]
impl MessageStore for MySqlStore {
    async fn messages_in_range(&self, range: &DateRange) -> Result<Vec<Message>> {
        let everything = Clause {
            sql: "1 = 1".to_string(),
            params: Vec::new(),
        };
        self.select_messages(range, "", everything).await
    }

    async fn messages_by_sender(
        &self,
        range: &DateRange,
        senders: &[IdentityPredicate],
    ) -> Result<Vec<Message>> {
        if senders.is_empty() {
            return self.messages_in_range(range).await;
        }
        let filter = Clause::any_of(senders.iter().map(sender_clause).collect());
        self.select_messages(range, "LEFT JOIN identities u ON u.id = m.user_id", filter)
            .await
    }

    async fn messages_by_mention_target(
        &self,
        range: &DateRange,
        targets: &[IdentityPredicate],
    ) -> Result<Vec<Message>> {
        if targets.is_empty() {
            return self.messages_in_range(range).await;
        }
        let filter = Clause::any_of(targets.iter().map(mention_clause).collect());
        self.select_messages(range, "", filter).await
    }

    async fn thread_members(
        &self,
        channel_id: &str,
        parent_timestamp: &str,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages m WHERE m.channel_id = ? \
             AND (m.thread_ts = ? OR (m.ts = ? AND m.thread_ts IS NULL)) \
             ORDER BY m.created_at, m.ts",
            MESSAGE_COLUMNS
        );
        let mut conn = self.conn().await?;
        let members = conn
            .exec_map(
                sql,
                (channel_id, parent_timestamp, parent_timestamp),
                message_from_row,
            )
            .await?;
        Ok(members)
    }

    async fn upsert_messages(&self, messages: &[Message]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        const SQL: &str = r#"
            INSERT INTO messages
            (channel_id, channel_name, user_id, user_name, text, ts, thread_ts,
             permalink, created_at, mention_type)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                channel_name = VALUES(channel_name),
                user_id = VALUES(user_id),
                user_name = IF(VALUES(user_name) = '', user_name, VALUES(user_name)),
                text = VALUES(text),
                thread_ts = VALUES(thread_ts),
                permalink = VALUES(permalink),
                created_at = VALUES(created_at),
                mention_type = VALUES(mention_type)
        "#;

        let rows = messages.iter().map(|m| {
            let values: Vec<Value> = vec![
                m.channel_id.clone().into(),
                m.channel_name.clone().into(),
                m.sender_id.clone().into(),
                m.sender_display_name.clone().into(),
                m.text.clone().into(),
                m.timestamp.clone().into(),
                m.thread_parent_timestamp.clone().into(),
                m.permalink.clone().into(),
                naive(m.created_at).into(),
                m.mention_classification.map(|k| k.as_str()).into(),
            ];
            Params::Positional(values)
        });

        let mut conn = self.conn().await?;
        conn.exec_batch(SQL, rows).await?;
        Ok(messages.len())
    }

    async fn replace_mentions(&self, message: &ThreadKey, mentions: &[Mention]) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        tx.exec_drop(
            "DELETE FROM mentions WHERE channel_id = ? AND message_ts = ?",
            (&message.channel_id, &message.timestamp),
        )
        .await?;

        if !mentions.is_empty() {
            tx.exec_batch(
                "INSERT IGNORE INTO mentions (channel_id, message_ts, target_id, target_kind) \
                 VALUES (?, ?, ?, ?)",
                mentions.iter().map(|mn| {
                    (
                        mn.channel_id.clone(),
                        mn.message_timestamp.clone(),
                        mn.target_id.clone(),
                        mn.target_kind.as_str(),
                    )
                }),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_identities(&self, identities: &[Identity]) -> Result<usize> {
        if identities.is_empty() {
            return Ok(0);
        }

        const SQL: &str = r#"
            INSERT INTO identities (id, kind, name, display_name, real_name)
            VALUES (?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                kind = VALUES(kind),
                name = VALUES(name),
                display_name = VALUES(display_name),
                real_name = VALUES(real_name)
        "#;

        let mut conn = self.conn().await?;
        conn.exec_batch(
            SQL,
            identities.iter().map(|i| {
                (
                    i.id.clone(),
                    i.kind.as_str(),
                    i.name.clone(),
                    i.display_name.clone(),
                    i.real_name.clone(),
                )
            }),
        )
        .await?;
        Ok(identities.len())
    }

    async fn identities(&self) -> Result<Vec<Identity>> {
        let mut conn = self.conn().await?;
        let identities = conn
            .query_map(
                "SELECT id, kind, name, display_name, real_name FROM identities ORDER BY id",
                |(id, kind, name, display_name, real_name): (String, String, String, String, String)| {
                    Identity {
                        id,
                        kind: MentionKind::parse(&kind).unwrap_or(MentionKind::User),
                        name,
                        display_name,
                        real_name,
                    }
                },
            )
            .await?;
        Ok(identities)
    }

    async fn backfill_display_names(&self) -> Result<u64> {
        const SQL: &str = r#"
            UPDATE messages m
            JOIN identities u ON u.id = m.user_id
            SET m.user_name = COALESCE(
                NULLIF(u.display_name, ''),
                NULLIF(u.real_name, ''),
                NULLIF(u.name, ''),
                u.id
            )
            WHERE m.user_name = ''
        "#;

        let mut conn = self.conn().await?;
        conn.query_drop(SQL).await?;
        Ok(conn.affected_rows())
    }

    async fn crawl_cursor(&self, channel_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let cursor = conn
            .exec_first(
                "SELECT latest_ts FROM crawl_state WHERE channel_id = ?",
                (channel_id,),
            )
            .await?;
        Ok(cursor)
    }

    async fn set_crawl_cursor(&self, channel_id: &str, latest_timestamp: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.exec_drop(
            "INSERT INTO crawl_state (channel_id, latest_ts) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE latest_ts = VALUES(latest_ts)",
            (channel_id, latest_timestamp),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TopicStore for MySqlStore {
    async fn upsert_topic(&self, name: &str, description: &str) -> Result<Topic> {
        let now = naive(Utc::now());
        let mut conn = self.conn().await?;
        conn.exec_drop(
            "INSERT INTO topics (name, description, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE description = VALUES(description), updated_at = VALUES(updated_at)",
            (name, description, now, now),
        )
        .await?;

        conn.exec_first::<TopicRow, _, _>(
            "SELECT id, name, description, created_at, updated_at FROM topics WHERE name = ?",
            (name,),
        )
        .await?
        .map(topic_from_row)
        .ok_or_else(|| Error::StorageError(format!("topic '{}' vanished after upsert", name)))
    }

    async fn topics(&self) -> Result<Vec<Topic>> {
        let mut conn = self.conn().await?;
        let topics = conn
            .query_map(
                "SELECT id, name, description, created_at, updated_at FROM topics ORDER BY name",
                topic_from_row,
            )
            .await?;
        Ok(topics)
    }

    async fn topic_document(&self, topic_id: u64) -> Result<Option<TopicDocument>> {
        let mut conn = self.conn().await?;
        let row: Option<(u64, String, String, NaiveDateTime)> = conn
            .exec_first(
                "SELECT topic_id, path, title, updated_at FROM topic_documents WHERE topic_id = ?",
                (topic_id,),
            )
            .await?;
        Ok(row.map(|(topic_id, path, title, updated_at)| TopicDocument {
            topic_id,
            path,
            title,
            updated_at: updated_at.and_utc(),
        }))
    }

    async fn upsert_topic_document(&self, document: &TopicDocument) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.exec_drop(
            "INSERT INTO topic_documents (topic_id, path, title, updated_at) VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE path = VALUES(path), title = VALUES(title), \
             updated_at = VALUES(updated_at)",
            (
                document.topic_id,
                &document.path,
                &document.title,
                naive(document.updated_at),
            ),
        )
        .await?;
        Ok(())
    }

    async fn add_topic_messages(&self, topic_id: u64, messages: &[ThreadKey]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.exec_batch(
            "INSERT IGNORE INTO topic_messages (topic_id, channel_id, message_ts) VALUES (?, ?, ?)",
            messages
                .iter()
                .map(|key| (topic_id, key.channel_id.clone(), key.timestamp.clone())),
        )
        .await?;
        Ok(())
    }
}
