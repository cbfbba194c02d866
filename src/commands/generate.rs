//! Cluster a window into topics and write their documents.

use super::Selection;
use crate::config::Config;
use crate::error::Result;
use crate::llm::OpenAiClient;
use crate::store::MySqlStore;
use crate::topics::{self, GenerateOptions, GenerationReport};

pub async fn run(config: &Config, selection: &Selection, dry_run: bool) -> Result<()> {
    let filter = selection.to_filter()?;
    let llm = OpenAiClient::from_config(&config.llm)?;
    let options = GenerateOptions::from_config(config, dry_run);

    // a dry run is unlocked and must not touch the schema
    let store = if dry_run {
        MySqlStore::new(&config.mysql)
    } else {
        MySqlStore::open(&config.mysql).await?
    };
    let report = topics::generate(&store, &llm, &filter, &options).await;
    store.disconnect().await?;

    print!("{}", summarize(&report?));
    Ok(())
}

/// Human-readable run summary.
pub fn summarize(report: &GenerationReport) -> String {
    let mut out = format!(
        "Messages: {} ({} threads)\n",
        report.messages, report.threads
    );

    if report.messages == 0 {
        out.push_str("Nothing to generate.\n");
        return out;
    }

    if report.dry_run {
        out.push_str(&format!("Planned topics: {}\n", report.planned.len()));
        for topic in &report.planned {
            out.push_str(&format!(
                "  - {} ({} messages): {}\n",
                topic.name, topic.message_count, topic.description
            ));
        }
        return out;
    }

    out.push_str(&format!(
        "Topics: {} created, {} updated\n",
        report.topics_created.len(),
        report.topics_updated.len()
    ));
    for path in &report.documents_written {
        out.push_str(&format!("  wrote {}\n", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::PlannedTopic;
    use std::path::PathBuf;

    #[test]
    fn summary_lists_written_documents() {
        let report = GenerationReport {
            messages: 5,
            threads: 1,
            topics_created: vec!["Deploys".into()],
            topics_updated: vec!["Hiring".into()],
            documents_written: vec![PathBuf::from("docs/deploys.md")],
            ..GenerationReport::default()
        };
        let text = summarize(&report);
        assert!(text.contains("Messages: 5 (1 threads)"));
        assert!(text.contains("1 created, 1 updated"));
        assert!(text.contains("wrote docs/deploys.md"));
    }

    #[test]
    fn dry_run_summary_lists_plan() {
        let report = GenerationReport {
            messages: 2,
            dry_run: true,
            planned: vec![PlannedTopic {
                name: "Deploys".into(),
                description: "release train".into(),
                message_count: 2,
            }],
            ..GenerationReport::default()
        };
        let text = summarize(&report);
        assert!(text.contains("Planned topics: 1"));
        assert!(text.contains("Deploys (2 messages): release train"));
        assert!(!text.contains("wrote"));
    }

    #[test]
    fn empty_window_summary() {
        assert!(summarize(&GenerationReport::default()).contains("Nothing to generate"));
    }
}
