//! Slack Web API access and the crawler that feeds the message store.

use serde::Deserialize;

pub mod client;
pub mod crawl;

pub use client::SlackClient;
pub use crawl::{crawl, map_message, CrawlOptions, CrawlReport};

/// Message as returned by `conversations.history` / `conversations.replies`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    /// Bot or legacy integration name
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: Option<u32>,
}

impl SlackMessage {
    pub fn has_replies(&self) -> bool {
        self.reply_count.unwrap_or(0) > 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub profile: SlackProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackUsergroup {
    pub id: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

impl ResponseMetadata {
    /// Cursor for the next page, `None` on the last page.
    pub fn next(&self) -> Option<String> {
        let cursor = self.next_cursor.trim();
        (!cursor.is_empty()).then(|| cursor.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_fields_default_when_absent() {
        let message: SlackMessage =
            serde_json::from_str(r#"{"ts":"1700000000.000100","type":"message"}"#).unwrap();
        assert_eq!(message.text, "");
        assert!(message.user.is_none());
        assert!(!message.has_replies());
    }

    #[test]
    fn blank_cursor_ends_pagination() {
        let meta = ResponseMetadata {
            next_cursor: "  ".into(),
        };
        assert_eq!(meta.next(), None);

        let meta: ResponseMetadata =
            serde_json::from_str(r#"{"next_cursor":"dXNlcjpVMEc5"}"#).unwrap();
        assert_eq!(meta.next().as_deref(), Some("dXNlcjpVMEc5"));
    }

    #[test]
    fn user_profile_is_optional() {
        let user: SlackUser = serde_json::from_str(r#"{"id":"U1","name":"alice"}"#).unwrap();
        assert_eq!(user.profile.display_name, "");
        assert!(!user.deleted);
    }
}
