//! Print the grouped markdown for a window.

use std::path::Path;

use tracing::info;

use super::Selection;
use crate::config::Config;
use crate::error::Result;
use crate::markdown::{render_grouped, RenderOptions};
use crate::query::fetch_grouped;
use crate::store::{Directory, MessageStore, MySqlStore};

/// Grouped markdown for the selection.
pub async fn render<S: MessageStore + ?Sized>(store: &S, selection: &Selection) -> Result<String> {
    let filter = selection.to_filter()?;
    let grouped = fetch_grouped(store, &filter).await?;
    let directory = Directory::load(store).await?;

    Ok(render_grouped(
        &grouped,
        &filter.range,
        &directory,
        &RenderOptions::default(),
    ))
}

pub async fn run(config: &Config, selection: &Selection, output: Option<&Path>) -> Result<()> {
    // validate before connecting
    selection.to_filter()?;

    let store = MySqlStore::new(&config.mysql);
    let markdown = render(&store, selection).await;
    store.disconnect().await?;
    let markdown = markdown?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &markdown).await?;
            info!(path = %path.display(), "Markdown written");
            println!("Saved to {}", path.display());
        }
        None => print!("{}", markdown),
    }
    Ok(())
}
