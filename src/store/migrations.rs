//! Versioned schema migrations for the MySQL backend.
//!
//! Applied versions are recorded in `schema_migrations`; a migration runs only
//! when its version is above the recorded maximum.

/// A numbered set of DDL statements.
///
/// MySQL commits DDL implicitly, so a migration can be half applied when the
/// version row fails to insert. Statements use `IF NOT EXISTS` and column
/// additions are checked against `information_schema` first.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
    pub columns: &'static [AddColumn],
}

/// A column added to an existing table, skipped when already present.
#[derive(Debug)]
pub struct AddColumn {
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

impl AddColumn {
    /// Counts the column in the current database; zero means it is missing.
    pub const EXISTS_QUERY: &'static str = "SELECT COUNT(*) FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?";

    pub fn alter_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table, self.column, self.definition
        )
    }
}

pub const SCHEMA_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INT UNSIGNED NOT NULL PRIMARY KEY,
        description VARCHAR(255) NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "messages, mentions, identities, crawl state",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                channel_id VARCHAR(32) NOT NULL,
                channel_name VARCHAR(255) NOT NULL DEFAULT '',
                user_id VARCHAR(32) NOT NULL DEFAULT '',
                user_name VARCHAR(255) NOT NULL DEFAULT '',
                text MEDIUMTEXT NOT NULL,
                ts VARCHAR(32) NOT NULL,
                thread_ts VARCHAR(32) NULL,
                permalink VARCHAR(512) NOT NULL DEFAULT '',
                created_at DATETIME(6) NOT NULL,
                UNIQUE KEY uq_messages_channel_ts (channel_id, ts),
                KEY idx_messages_created_at (created_at),
                KEY idx_messages_thread (channel_id, thread_ts),
                KEY idx_messages_user (user_id)
            ) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mentions (
                channel_id VARCHAR(32) NOT NULL,
                message_ts VARCHAR(32) NOT NULL,
                target_id VARCHAR(32) NOT NULL,
                target_kind VARCHAR(8) NOT NULL,
                PRIMARY KEY (channel_id, message_ts, target_id),
                KEY idx_mentions_target (target_id)
            ) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                id VARCHAR(32) NOT NULL PRIMARY KEY,
                kind VARCHAR(8) NOT NULL,
                name VARCHAR(255) NOT NULL DEFAULT '',
                display_name VARCHAR(255) NOT NULL DEFAULT '',
                real_name VARCHAR(255) NOT NULL DEFAULT ''
            ) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS crawl_state (
                channel_id VARCHAR(32) NOT NULL PRIMARY KEY,
                latest_ts VARCHAR(32) NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            )
            "#,
        ],
        columns: &[],
    },
    Migration {
        version: 2,
        description: "mention classification on messages",
        statements: &[],
        columns: &[AddColumn {
            table: "messages",
            column: "mention_type",
            definition: "VARCHAR(8) NULL",
        }],
    },
    Migration {
        version: 3,
        description: "topics and documents",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                UNIQUE KEY uq_topics_name (name)
            ) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS topic_documents (
                topic_id BIGINT UNSIGNED NOT NULL PRIMARY KEY,
                path VARCHAR(512) NOT NULL,
                title VARCHAR(255) NOT NULL,
                updated_at DATETIME(6) NOT NULL
            ) DEFAULT CHARSET = utf8mb4 COLLATE = utf8mb4_unicode_ci
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS topic_messages (
                topic_id BIGINT UNSIGNED NOT NULL,
                channel_id VARCHAR(32) NOT NULL,
                message_ts VARCHAR(32) NOT NULL,
                PRIMARY KEY (topic_id, channel_id, message_ts)
            )
            "#,
        ],
        columns: &[],
    },
];

/// Migrations newer than `current`, in ascending version order.
pub fn pending(current: Option<u32>) -> Vec<&'static Migration> {
    let current = current.unwrap_or(0);
    let mut pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    pending.sort_by_key(|m| m.version);
    pending
}

pub fn latest_version() -> u32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}
