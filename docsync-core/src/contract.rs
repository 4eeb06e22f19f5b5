//! # contract: the repository content facade
//!
//! This module defines the single trait ([`GitManager`]) that every sync strategy
//! implements, plus the plain data types it returns.
//!
//! ## Interface & Extensibility
//! - [`crate::git_cli::LocalGitManager`] drives a local `git` binary.
//! - [`crate::github::GitHubManager`] mirrors through a hosted provider's content API.
//! - Which one runs is a deployment choice ([`crate::config::MirrorConfig::build_manager`]),
//!   never a branch inside business logic.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; with the `test-export-mocks` feature the
//!   generated `MockGitManager` is available to downstream crates and integration tests.
//!
//! ## Security contract
//! - `validate_files_exist` and `read_managed_file_content` must re-derive the tracked
//!   file set from the authoritative source on every call, never trust caller input.

use std::path::PathBuf;

use async_trait::async_trait;
#[allow(unused_imports)]
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
}

/// A single entry of a repository listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileNode {
    /// Relative to the mirror root, `/`-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl FileNode {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::File,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Dir,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

/// Unified access to a repository's mirrored content.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait GitManager: Send + Sync {
    /// Make sure the local mirror exists and reflects the remote's current head.
    async fn ensure_cloned(&self, repo: &Repository) -> Result<(), MirrorError>;

    /// List every tracked file and directory of the repository.
    async fn list_repository_files(&self, repo: &Repository)
        -> Result<Vec<FileNode>, MirrorError>;

    /// Succeeds only if every path is a tracked file. An empty list succeeds trivially.
    async fn validate_files_exist(
        &self,
        repo: &Repository,
        paths: &[String],
    ) -> Result<(), MirrorError>;

    /// Read a tracked file's raw bytes.
    async fn read_managed_file_content(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Vec<u8>, MirrorError>;

    /// Where this strategy keeps the repository's mirror.
    fn mirror_path(&self, repo: &Repository) -> PathBuf;
}
