//! List stored topics with their documents.

use crate::config::Config;
use crate::error::Result;
use crate::store::{MySqlStore, TopicStore};

/// One line per topic: name, document path, last update.
pub async fn list<S: TopicStore + ?Sized>(store: &S) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for topic in store.topics().await? {
        let document = store.topic_document(topic.id).await?;
        let path = document
            .as_ref()
            .map(|d| d.path.as_str())
            .unwrap_or("(no document)");
        lines.push(format!(
            "{:<32} {:<40} {}",
            topic.name,
            path,
            topic.updated_at.format("%Y-%m-%d %H:%M")
        ));
    }
    Ok(lines)
}

pub async fn run(config: &Config) -> Result<()> {
    let store = MySqlStore::new(&config.mysql);
    let lines = list(&store).await;
    store.disconnect().await?;
    let lines = lines?;

    if lines.is_empty() {
        println!("No topics yet. Run `generate` first.");
        return Ok(());
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}
