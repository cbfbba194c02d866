//! Slack Knowledge Library
//!
//! This library provides tools to:
//! - Crawl Slack channels (history, thread replies, users and usergroups) into MySQL
//! - Select messages by window, sender and mention target
//! - Reconstruct conversation threads from flat message lists
//! - Render grouped conversations as markdown
//! - Cluster conversations into topics with an LLM and maintain one document per topic

pub mod config;
pub mod documents;
pub mod error;
pub mod grouping;
pub mod identity;
pub mod llm;
pub mod lock;
pub mod markdown;
pub mod metrics;
pub mod models;
pub mod prompts;
pub mod query;
pub mod slack;
pub mod store;
pub mod topics;

// Re-export common types
pub use config::Config;
pub use error::{Error, Result};
pub use grouping::{expand_threads, group_messages};
pub use identity::DateRange;
pub use llm::{LlmClient, OpenAiClient};
pub use models::{GroupedMessages, Message, MessageFilter, MessageThread, ThreadKey};
pub use prompts::{load_prompt, Prompt};
pub use query::{fetch_grouped, select_messages};
pub use store::{MemoryStore, MessageStore, MySqlStore, TopicStore};

pub mod commands;
