//! Concatenates the selected Markdown files of a repository.

use tracing::debug;

use crate::contract::GitManager;
use crate::error::MirrorError;
use crate::repository::Repository;

pub const SEPARATOR: &[u8] = b"\n\n---\n\n";

const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "markdown"];

pub fn is_markdown(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(stem, ext)| {
            !stem.is_empty()
                && !stem.ends_with('/')
                && MARKDOWN_EXTENSIONS
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Join file contents with a horizontal rule between successive parts.
pub fn concat_markdown(parts: &[Vec<u8>]) -> Vec<u8> {
    let total = parts.iter().map(Vec::len).sum::<usize>()
        + SEPARATOR.len() * parts.len().saturating_sub(1);
    let mut out = Vec::with_capacity(total);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(SEPARATOR);
        }
        out.extend_from_slice(part);
    }
    out
}

/// Read every Markdown path in `paths` (in order) and concatenate them.
///
/// Non-Markdown paths are skipped. Any read failure aborts the whole call.
pub async fn aggregate_markdown(
    manager: &dyn GitManager,
    repo: &Repository,
    paths: &[String],
) -> Result<Vec<u8>, MirrorError> {
    let mut parts = Vec::new();
    for path in paths.iter().filter(|p| is_markdown(p)) {
        let content = manager
            .read_managed_file_content(repo, path)
            .await
            .map_err(|e| MirrorError::AggregateRead {
                path: path.clone(),
                source: Box::new(e),
            })?;
        parts.push(content);
    }
    debug!(repository = %repo.id(), files = parts.len(), "Aggregated markdown");
    Ok(concat_markdown(&parts))
}
