//! Tests for generate command

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use slack_knowledge::commands::generate::summarize;
use slack_knowledge::error::{Error, Result};
use slack_knowledge::llm::{CompletionRequest, LlmClient, RetryPolicy};
use slack_knowledge::models::{Message, MessageFilter};
use slack_knowledge::topics::{generate, GenerateOptions};
use slack_knowledge::{DateRange, MemoryStore, TopicStore};

struct CannedLlm {
    responses: Mutex<VecDeque<String>>,
}

impl CannedLlm {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for CannedLlm {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::LlmRejected("no more responses".to_string()))
    }

    fn model(&self) -> &str {
        "canned"
    }
}

fn message(ts: i64, text: &str, parent: Option<i64>) -> Message {
    Message {
        id: None,
        channel_id: "C0OPS".to_string(),
        channel_name: "ops".to_string(),
        sender_id: "U0ALICE".to_string(),
        sender_display_name: "alice".to_string(),
        text: text.to_string(),
        timestamp: format!("{}.000100", ts),
        created_at: Utc.timestamp_opt(ts, 0).unwrap(),
        thread_parent_timestamp: parent.map(|p| format!("{}.000100", p)),
        permalink: String::new(),
        mention_classification: None,
    }
}

fn options(docs: &std::path::Path, dry_run: bool) -> GenerateOptions {
    GenerateOptions {
        docs_dir: docs.to_path_buf(),
        prompts_dir: None,
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 2,
        },
        dry_run,
    }
}

fn window() -> MessageFilter {
    MessageFilter::new(
        DateRange::new(
            Utc.timestamp_opt(1_000, 0).unwrap(),
            Utc.timestamp_opt(2_000, 0).unwrap(),
        )
        .unwrap(),
    )
}

const CLUSTERS: &str = r#"{"topics": [
    {"name": "Database failover",
     "description": "How the primary is failed over.",
     "message_refs": ["[ref:C0OPS/1100.000100]"]}
]}"#;

#[tokio::test]
async fn test_generate_writes_document_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::with_messages(vec![
        message(1_100, "primary is down, failing over", None),
        message(1_160, "replica promoted", Some(1_100)),
    ]);
    let llm = CannedLlm::new(&[
        CLUSTERS,
        "```markdown\n# Database failover\n\nPromote the replica.\n```",
    ]);

    let report = generate(&store, &llm, &window(), &options(dir.path(), false))
        .await
        .unwrap();

    assert_eq!(report.topics_created, vec!["Database failover".to_string()]);
    let path = dir.path().join("database-failover.md");
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, "# Database failover\n\nPromote the replica.\n");

    let topics = store.topics().await.unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(store.topic_message_keys(topics[0].id).len(), 2);

    let summary = summarize(&report);
    assert!(summary.contains("1 created, 0 updated"));
}

#[tokio::test]
async fn test_generate_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::with_messages(vec![message(1_100, "primary is down", None)]);
    let llm = CannedLlm::new(&[CLUSTERS]);

    let report = generate(&store, &llm, &window(), &options(dir.path(), true))
        .await
        .unwrap();

    assert_eq!(report.planned.len(), 1);
    assert!(report.documents_written.is_empty());
    assert!(store.topics().await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
