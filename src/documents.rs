//! Topic documents on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;

/// File-name-safe form of a topic name: lowercase, words joined by `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug
    }
}

pub fn document_path(dir: &Path, topic_name: &str) -> PathBuf {
    dir.join(format!("{}.md", slugify(topic_name)))
}

/// Path for a topic that has no document yet.
///
/// Names that slug the same ("CI/CD", "CI CD") get `-2`, `-3`, ... so a new
/// topic never takes over a path that is claimed or already on disk.
pub async fn unclaimed_document_path(
    dir: &Path,
    topic_name: &str,
    claimed: &HashSet<PathBuf>,
) -> Result<PathBuf> {
    let slug = slugify(topic_name);
    let mut path = dir.join(format!("{}.md", slug));
    let mut suffix = 1u32;
    while claimed.contains(&path) || tokio::fs::try_exists(&path).await? {
        suffix += 1;
        path = dir.join(format!("{}-{}.md", slug, suffix));
    }
    Ok(path)
}

/// Contents of an existing document, `None` if it does not exist.
pub async fn read_document(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write through a temporary file so readers never see half a document.
pub async fn write_document(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("md.tmp");
    let mut body = content.trim_end().to_string();
    body.push('\n');
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    info!(path = %path.display(), "Wrote document");
    Ok(())
}

/// First level-one heading, if any.
pub fn title_of(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Drop a surrounding ```markdown fence some models add.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body_start) = rest.find('\n') else {
        return trimmed;
    };
    rest[body_start + 1..]
        .trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Deploy Pipeline / CI"), "deploy-pipeline-ci");
        assert_eq!(slugify("  On-call  rota "), "on-call-rota");
        assert_eq!(slugify("Релизы 2024"), "релизы-2024");
        assert_eq!(slugify("!!!"), "topic");
    }

    #[tokio::test]
    async fn colliding_slugs_get_numbered_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ci-cd.md"), "# CI/CD\n").unwrap();
        let claimed: HashSet<PathBuf> = [dir.path().join("ci-cd-2.md")].into_iter().collect();

        let path = unclaimed_document_path(dir.path(), "CI CD", &claimed)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("ci-cd-3.md"));
    }

    #[test]
    fn title_is_first_h1() {
        assert_eq!(
            title_of("intro\n# Release process\n## Steps"),
            Some("Release process".to_string())
        );
        assert_eq!(title_of("## only h2"), None);
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```markdown\n# T\nbody\n```"), "# T\nbody");
        assert_eq!(strip_code_fence("# plain"), "# plain");
        assert_eq!(strip_code_fence("```unterminated"), "```unterminated");
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let path = document_path(&dir.path().join("docs"), "Release Process");

        assert_eq!(read_document(&path).await.unwrap(), None);

        write_document(&path, "# Release Process\n\nShip on Tuesdays.\n\n")
            .await
            .unwrap();

        let content = read_document(&path).await.unwrap().unwrap();
        assert_eq!(content, "# Release Process\n\nShip on Tuesdays.\n");
        assert!(path.ends_with("release-process.md"));
        assert!(!path.with_extension("md.tmp").exists());
    }
}
