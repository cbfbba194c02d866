//! System prompt templates.
//!
//! Templates live in `prompts/`; the copies compiled into the binary are
//! used when no override directory is configured or the file is missing.
//! Placeholders are written `{{name}}`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

const TOPIC_CLUSTERING: &str = include_str!("../prompts/topic_clustering.md");
const DOCUMENT_WRITER: &str = include_str!("../prompts/document_writer.md");

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Assigns messages to topics, JSON output.
    TopicClustering,
    /// Writes or updates one topic document.
    DocumentWriter,
}

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::TopicClustering => "topic_clustering.md",
            Prompt::DocumentWriter => "document_writer.md",
        }
    }

    pub fn builtin(&self) -> &'static str {
        match self {
            Prompt::TopicClustering => TOPIC_CLUSTERING,
            Prompt::DocumentWriter => DOCUMENT_WRITER,
        }
    }

    /// Load from `dir` if given and present, else the built-in template.
    pub fn load(&self, dir: Option<&Path>) -> String {
        if let Some(dir) = dir {
            match load_prompt(dir, self.filename()) {
                Ok(template) => return template,
                Err(err) => debug!("Using built-in {} prompt: {}", self.filename(), err),
            }
        }
        self.builtin().to_string()
    }
}

/// Load a prompt by file name from `dir`.
pub fn load_prompt(dir: &Path, filename: &str) -> Result<String> {
    let path: PathBuf = dir.join(filename);
    std::fs::read_to_string(&path).map_err(|e| {
        Error::ConfigError(format!("Failed to load prompt {}: {}", path.display(), e))
    })
}

/// Substitute `{{key}}` placeholders.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{{{}}}}}", key), value)
        })
}

/// List of all available prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![Prompt::TopicClustering, Prompt::DocumentWriter]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_all_prompt_filenames_are_md() {
        for prompt in list_prompts() {
            assert!(
                prompt.filename().ends_with(".md"),
                "Prompt {:?} should have .md extension",
                prompt
            );
        }
    }

    #[test]
    fn test_builtin_templates_carry_placeholders() {
        assert!(Prompt::TopicClustering.builtin().contains("{{schema}}"));
        assert!(Prompt::TopicClustering.builtin().contains("{{existing_topics}}"));
        assert!(Prompt::DocumentWriter.builtin().contains("{{topic_name}}"));
    }

    #[test]
    fn test_load_prefers_override_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("document_writer.md"), "custom {{topic_name}}").unwrap();

        assert_eq!(
            Prompt::DocumentWriter.load(Some(dir.path())),
            "custom {{topic_name}}"
        );
        // missing file falls back
        assert_eq!(
            Prompt::TopicClustering.load(Some(dir.path())),
            Prompt::TopicClustering.builtin()
        );
        assert_eq!(
            Prompt::TopicClustering.load(None),
            Prompt::TopicClustering.builtin()
        );
    }

    #[test]
    fn test_load_prompt_nonexistent_file() {
        let dir = tempdir().unwrap();
        assert!(load_prompt(dir.path(), "nonexistent_file_12345.md").is_err());
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let text = render("{{a}} and {{a}} but {{b}}", &[("a", "x"), ("b", "y")]);
        assert_eq!(text, "x and x but y");
    }
}
