//! Topic clustering and document generation.
//!
//! One run: select and group messages, ask the model to cluster them into
//! topics, then write or update one markdown document per topic and record
//! topics, documents and membership in the store.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::documents::{self, strip_code_fence};
use crate::error::{Error, Result};
use crate::llm::{retry_with_backoff, CompletionRequest, LlmClient, RetryPolicy};
use crate::markdown::{parse_reference, render_grouped, RenderOptions};
use crate::metrics;
use crate::models::{GroupedMessages, MessageFilter, Topic, TopicDocument, ThreadKey};
use crate::prompts::{render, Prompt};
use crate::query::fetch_grouped;
use crate::store::{Directory, MessageStore, TopicStore};

/// One topic as returned by the clustering call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TopicAssignment {
    /// Short, stable topic name
    pub name: String,
    /// One or two sentences
    #[serde(default)]
    pub description: String,
    /// Reference tags of the messages in this topic
    #[serde(default)]
    pub message_refs: Vec<String>,
}

/// Structured output of the clustering call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClusteringResponse {
    pub topics: Vec<TopicAssignment>,
}

/// A clustering topic whose references were checked against the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTopic {
    pub name: String,
    pub description: String,
    pub messages: Vec<ThreadKey>,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub docs_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    /// Stop after clustering; write nothing
    pub dry_run: bool,
}

impl GenerateOptions {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            docs_dir: config.docs.dir.clone(),
            prompts_dir: config.docs.prompts_dir.clone(),
            retry: config.retry.clone(),
            dry_run,
        }
    }
}

/// Topic planned by a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedTopic {
    pub name: String,
    pub description: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub messages: usize,
    pub threads: usize,
    pub topics_created: Vec<String>,
    pub topics_updated: Vec<String>,
    pub documents_written: Vec<PathBuf>,
    pub planned: Vec<PlannedTopic>,
    pub dry_run: bool,
}

/// Parse and check a clustering response.
///
/// Unknown references are dropped; topics left without messages are
/// dropped; topics with the same name (case-insensitive) are merged. No
/// surviving topic is a validation error so the call is retried.
pub fn validate_clustering(raw: &str, known: &HashSet<ThreadKey>) -> Result<Vec<ValidatedTopic>> {
    let response: ClusteringResponse = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| Error::ResponseValidation(format!("not a topics object: {}", e)))?;

    let mut topics: Vec<ValidatedTopic> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for assignment in response.topics {
        let name = assignment.name.trim().to_string();
        if name.is_empty() {
            warn!("Dropping topic without a name");
            continue;
        }

        let mut messages: Vec<ThreadKey> = Vec::new();
        for reference in &assignment.message_refs {
            match parse_reference(reference) {
                Some(key) if known.contains(&key) => {
                    if !messages.contains(&key) {
                        messages.push(key);
                    }
                }
                _ => warn!(topic = %name, reference = %reference, "Dropping unknown message reference"),
            }
        }
        if messages.is_empty() {
            warn!(topic = %name, "Dropping topic without known messages");
            continue;
        }

        match by_name.get(&name.to_lowercase()) {
            Some(&index) => {
                let topic = &mut topics[index];
                for key in messages {
                    if !topic.messages.contains(&key) {
                        topic.messages.push(key);
                    }
                }
            }
            None => {
                by_name.insert(name.to_lowercase(), topics.len());
                topics.push(ValidatedTopic {
                    name,
                    description: assignment.description.trim().to_string(),
                    messages,
                });
            }
        }
    }

    if topics.is_empty() {
        return Err(Error::ResponseValidation(
            "no topic references a known message".to_string(),
        ));
    }
    Ok(topics)
}

/// The part of `grouped` a topic covers: a referenced thread message brings
/// its whole thread.
pub fn select_for_topic(grouped: &GroupedMessages, keys: &[ThreadKey]) -> GroupedMessages {
    let wanted: HashSet<&ThreadKey> = keys.iter().collect();

    let threads: Vec<_> = grouped
        .threads
        .iter()
        .filter(|thread| thread.messages().any(|m| wanted.contains(&m.key())))
        .cloned()
        .collect();
    let standalone_messages: Vec<_> = grouped
        .standalone_messages
        .iter()
        .filter(|m| wanted.contains(&m.key()))
        .cloned()
        .collect();

    let total_message_count =
        threads.iter().map(|t| t.message_count).sum::<usize>() + standalone_messages.len();
    GroupedMessages {
        threads,
        standalone_messages,
        total_message_count,
    }
}

fn member_keys(grouped: &GroupedMessages) -> Vec<ThreadKey> {
    grouped
        .threads
        .iter()
        .flat_map(|t| t.messages())
        .chain(grouped.standalone_messages.iter())
        .map(|m| m.key())
        .collect()
}

fn existing_topics_list(topics: &[Topic]) -> String {
    if topics.is_empty() {
        return "(none yet)".to_string();
    }
    topics
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn cluster<L>(
    llm: &L,
    options: &GenerateOptions,
    transcript: &str,
    existing: &[Topic],
    known: &HashSet<ThreadKey>,
) -> Result<Vec<ValidatedTopic>>
where
    L: LlmClient + ?Sized,
{
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(ClusteringResponse))?;
    let existing_topics = existing_topics_list(existing);
    let system = render(
        &Prompt::TopicClustering.load(options.prompts_dir.as_deref()),
        &[
            ("schema", schema.as_str()),
            ("existing_topics", existing_topics.as_str()),
        ],
    );
    let request = CompletionRequest::new(system, transcript).json();

    let request = &request;
    retry_with_backoff(&options.retry, "topic clustering", move || async move {
        let raw = llm.complete(request).await?;
        validate_clustering(&raw, known)
    })
    .await
}

async fn write_topic_document<L>(
    llm: &L,
    options: &GenerateOptions,
    topic: &ValidatedTopic,
    rendered: &str,
    existing: Option<&str>,
) -> Result<String>
where
    L: LlmClient + ?Sized,
{
    let system = render(
        &Prompt::DocumentWriter.load(options.prompts_dir.as_deref()),
        &[
            ("topic_name", topic.name.as_str()),
            ("topic_description", topic.description.as_str()),
        ],
    );
    let user = match existing {
        Some(document) => format!(
            "## Existing document\n\n{}\n\n## New messages\n\n{}",
            document, rendered
        ),
        None => format!("## Messages\n\n{}", rendered),
    };
    let request = CompletionRequest::new(system, user);

    let request = &request;
    retry_with_backoff(&options.retry, "document writing", move || async move {
        let raw = llm.complete(request).await?;
        let document = strip_code_fence(&raw);
        if document.is_empty() {
            return Err(Error::ResponseValidation("empty document".to_string()));
        }
        Ok(document.to_string())
    })
    .await
}

/// Run the pipeline for one filter.
pub async fn generate<S, L>(
    store: &S,
    llm: &L,
    filter: &MessageFilter,
    options: &GenerateOptions,
) -> Result<GenerationReport>
where
    S: MessageStore + TopicStore + ?Sized,
    L: LlmClient + ?Sized,
{
    let mut report = GenerationReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    let grouped = fetch_grouped(store, filter).await?;
    report.messages = grouped.total_message_count;
    report.threads = grouped.threads.len();
    if grouped.is_empty() {
        info!("No messages in range, nothing to generate");
        return Ok(report);
    }

    let directory = Directory::load(store).await?;
    let transcript = render_grouped(&grouped, &filter.range, &directory, &RenderOptions::for_llm());
    let known: HashSet<ThreadKey> = member_keys(&grouped).into_iter().collect();
    let existing = store.topics().await?;

    let topics = cluster(llm, options, &transcript, &existing, &known).await?;
    info!(topics = topics.len(), model = llm.model(), "Clustered messages into topics");

    let existing_names: HashSet<String> = existing.iter().map(|t| t.name.to_lowercase()).collect();
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    if !options.dry_run {
        for topic in &existing {
            if let Some(document) = store.topic_document(topic.id).await? {
                claimed.insert(PathBuf::from(document.path));
            }
        }
    }

    for topic in &topics {
        let subset = select_for_topic(&grouped, &topic.messages);

        if options.dry_run {
            report.planned.push(PlannedTopic {
                name: topic.name.clone(),
                description: topic.description.clone(),
                message_count: subset.total_message_count,
            });
            continue;
        }

        let stored = store.upsert_topic(&topic.name, &topic.description).await?;
        if existing_names.contains(&topic.name.to_lowercase()) {
            report.topics_updated.push(stored.name.clone());
        } else {
            report.topics_created.push(stored.name.clone());
        }

        let path = match store.topic_document(stored.id).await? {
            Some(document) => PathBuf::from(document.path),
            None => {
                let path =
                    documents::unclaimed_document_path(&options.docs_dir, &stored.name, &claimed)
                        .await?;
                claimed.insert(path.clone());
                path
            }
        };
        let previous = documents::read_document(&path).await?;

        let rendered = render_grouped(&subset, &filter.range, &directory, &RenderOptions::default());
        let content =
            write_topic_document(llm, options, topic, &rendered, previous.as_deref()).await?;
        documents::write_document(&path, &content).await?;
        metrics::record_document_written();

        store
            .upsert_topic_document(&TopicDocument {
                topic_id: stored.id,
                path: path.to_string_lossy().into_owned(),
                title: documents::title_of(&content).unwrap_or_else(|| stored.name.clone()),
                updated_at: Utc::now(),
            })
            .await?;
        store
            .add_topic_messages(stored.id, &member_keys(&subset))
            .await?;

        info!(
            topic = %stored.name,
            messages = subset.total_message_count,
            updated = previous.is_some(),
            "Topic document written"
        );
        report.documents_written.push(path);
    }

    Ok(report)
}
