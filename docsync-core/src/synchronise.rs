//! Use-case layer over the [`GitManager`] facade.
//!
//! [`DocumentService`] is what callers (CLI, HTTP handlers) talk to. It adds the
//! guarantees the strategies themselves do not give:
//!   - one in-flight sync per repository id; overlapping calls queue on a
//!     per-repository async lock, and reads of the selection take the same lock
//!     so they never observe a half-refreshed mirror
//!   - the managed-file selection, validated against a fresh listing before it
//!     is stored (kept in memory here; persistence proper lives elsewhere)
//!
//! # Error Handling
//! Nothing is retried. Each failure is returned immediately, wrapped by the
//! strategy with the repository, path or verb involved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{error, info};
use uuid::Uuid;

use crate::aggregate::aggregate_markdown;
use crate::contract::{FileNode, GitManager};
use crate::error::MirrorError;
use crate::path_guard;
use crate::repository::Repository;

#[derive(Debug)]
pub struct SyncReport {
    pub repositories: Vec<RepositoryReport>,
}

#[derive(Debug)]
pub struct RepositoryReport {
    pub repository_id: Uuid,
    pub name: String,
    pub files: usize,
}

pub struct DocumentService {
    manager: Arc<dyn GitManager>,
    sync_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    selections: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl DocumentService {
    pub fn new(manager: Arc<dyn GitManager>) -> Self {
        Self {
            manager,
            sync_locks: Mutex::new(HashMap::new()),
            selections: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<dyn GitManager> {
        &self.manager
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.sync_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone()
    }

    /// Bring the repository's mirror up to date.
    pub async fn sync(&self, repo: &Repository) -> Result<(), MirrorError> {
        let lock = self.lock_for(repo.id());
        let _guard = lock.lock().await;

        info!(repository = %repo.id(), repo_url = repo.url(), "[SYNC] Starting mirror sync");
        match self.manager.ensure_cloned(repo).await {
            Ok(()) => {
                info!(repository = %repo.id(), "[SYNC] Mirror sync succeeded");
                Ok(())
            }
            Err(e) => {
                error!(repository = %repo.id(), error = %e, "[SYNC][ERROR] Mirror sync failed");
                Err(e)
            }
        }
    }

    /// Sync every repository in order, stopping at the first failure.
    pub async fn sync_all(&self, repos: &[Repository]) -> Result<SyncReport, MirrorError> {
        let mut repositories = Vec::with_capacity(repos.len());
        for repo in repos {
            self.sync(repo).await?;
            let files = self
                .list_files(repo)
                .await?
                .iter()
                .filter(|n| n.is_file())
                .count();
            repositories.push(RepositoryReport {
                repository_id: repo.id(),
                name: repo.name().to_string(),
                files,
            });
        }
        Ok(SyncReport { repositories })
    }

    pub async fn list_files(&self, repo: &Repository) -> Result<Vec<FileNode>, MirrorError> {
        self.manager.list_repository_files(repo).await
    }

    /// Validate and store the managed-file selection, replacing any previous one.
    pub async fn select_files(
        &self,
        repo: &Repository,
        paths: &[String],
    ) -> Result<Vec<String>, MirrorError> {
        let lock = self.lock_for(repo.id());
        let _guard = lock.lock().await;

        self.manager.validate_files_exist(repo, paths).await?;

        let mut selected: Vec<String> = Vec::with_capacity(paths.len());
        for path in paths {
            let normalized = path_guard::checked_relative(path)?;
            if !selected.contains(&normalized) {
                selected.push(normalized);
            }
        }

        info!(repository = %repo.id(), files = selected.len(), "Stored managed file selection");
        self.selections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo.id(), selected.clone());
        Ok(selected)
    }

    pub fn selected_files(&self, repo: &Repository) -> Vec<String> {
        self.selections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&repo.id())
            .cloned()
            .unwrap_or_default()
    }

    /// Concatenated Markdown of the current selection; empty when nothing is selected.
    pub async fn get_selected_markdown(&self, repo: &Repository) -> Result<Vec<u8>, MirrorError> {
        let lock = self.lock_for(repo.id());
        let _guard = lock.lock().await;

        let selected = self.selected_files(repo);
        aggregate_markdown(self.manager.as_ref(), repo, &selected).await
    }
}
