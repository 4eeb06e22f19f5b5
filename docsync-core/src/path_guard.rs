//! Confines file-system access to a repository's mirror root.
//!
//! Two gates exist. The lexical one ([`resolve`], [`normalize`]) rejects anything
//! that would climb out of the root. The authoritative one ([`ensure_tracked`])
//! requires the path to appear in a freshly derived listing of tracked files, which
//! also rules out untracked files that merely sit inside the mirror directory.
//! [`confine_existing`] additionally resolves symlinks before a read.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::contract::FileNode;
use crate::error::MirrorError;

fn traversal(path: &str) -> MirrorError {
    MirrorError::PathTraversal {
        path: path.to_string(),
    }
}

/// Lexically normalise a caller-supplied relative path to `a/b/c` form.
///
/// `.` segments vanish and `..` pops its parent. Absolute paths, drive prefixes,
/// NUL bytes and any `..` that would leave the root are errors.
pub fn normalize(user_path: &str) -> Result<String, MirrorError> {
    if user_path.contains('\0') {
        return Err(traversal(user_path));
    }
    let unified = user_path.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(traversal(user_path));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(traversal(user_path));
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve `user_path` against `root`, failing if the result is not inside `root`.
pub fn resolve(root: &Path, user_path: &str) -> Result<PathBuf, MirrorError> {
    let relative = normalize(user_path)?;
    let joined = root.join(&relative);

    let rel = joined.strip_prefix(root).map_err(|_| traversal(user_path))?;
    let escapes = rel.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || rel.is_absolute() {
        return Err(traversal(user_path));
    }
    Ok(joined)
}

/// Fail closed on any `..` segment, even one that would stay inside the root.
pub fn reject_parent_segments(user_path: &str) -> Result<(), MirrorError> {
    if user_path.replace('\\', "/").split('/').any(|s| s == "..") {
        return Err(traversal(user_path));
    }
    Ok(())
}

/// Normalise a path handed to a facade entry point.
pub fn checked_relative(user_path: &str) -> Result<String, MirrorError> {
    reject_parent_segments(user_path)?;
    normalize(user_path)
}

/// Canonicalise `path` and make sure symlinks do not lead outside `root`.
pub async fn confine_existing(root: &Path, path: &Path) -> Result<PathBuf, MirrorError> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| MirrorError::io(root, e))?;
    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| MirrorError::io(path, e))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(traversal(&path.display().to_string()));
    }
    Ok(canonical)
}

/// Files (not directories) of a listing, for membership checks.
pub fn tracked_files(nodes: &[FileNode]) -> HashSet<&str> {
    nodes
        .iter()
        .filter(|n| n.is_file())
        .map(|n| n.path.as_str())
        .collect()
}

pub fn ensure_tracked(
    repository: &str,
    path: &str,
    tracked: &HashSet<&str>,
) -> Result<(), MirrorError> {
    if tracked.contains(path) {
        Ok(())
    } else {
        Err(MirrorError::UntrackedFile {
            repository: repository.to_string(),
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        let cases = [
            ("README.md", "README.md"),
            ("./docs/guide.md", "docs/guide.md"),
            ("docs/./a/../guide.md", "docs/guide.md"),
            ("docs\\guide.md", "docs/guide.md"),
            ("docs//guide.md", "docs/guide.md"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize(input).unwrap(), expected, "input: {input}");
        }
    }

    #[test]
    fn normalize_rejects_escapes() {
        for input in ["../etc/passwd", "docs/../../x", "/etc/passwd", "C:/x", "a\0b"] {
            assert!(
                matches!(normalize(input), Err(MirrorError::PathTraversal { .. })),
                "input should be rejected: {input:?}"
            );
        }
    }

    #[test]
    fn resolve_stays_under_root() {
        let root = Path::new("/srv/mirrors/abc");
        assert_eq!(
            resolve(root, "docs/a.md").unwrap(),
            PathBuf::from("/srv/mirrors/abc/docs/a.md")
        );
        assert!(resolve(root, "../def/a.md").is_err());
    }

    #[test]
    fn checked_relative_refuses_inner_parent_segments() {
        assert!(checked_relative("docs/../README.md").is_err());
        assert_eq!(checked_relative("docs/a.md").unwrap(), "docs/a.md");
    }

    #[test]
    fn ensure_tracked_names_offending_path() {
        let nodes = vec![FileNode::file("a.md"), FileNode::dir("docs")];
        let tracked = tracked_files(&nodes);
        assert!(ensure_tracked("r", "a.md", &tracked).is_ok());
        match ensure_tracked("r", "docs", &tracked) {
            Err(MirrorError::UntrackedFile { path, .. }) => assert_eq!(path, "docs"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
