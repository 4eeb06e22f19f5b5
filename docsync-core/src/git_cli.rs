//! Local-tool sync strategy: drives the `git` binary.
//!
//! Every invocation goes through [`GitCli::run`], which accepts only the verbs in
//! [`GitVerb`] and refuses anything else before a process exists. The subprocess
//! sees a scrubbed environment (`PATH`, `HOME`, `GIT_TERMINAL_PROMPT=0`, plus
//! `GIT_ASKPASS` when a [`CredentialRelay`] is supplied), has no stdin, and is
//! killed if it outlives the configured timeout.
//!
//! Mirror lifecycle per repository: absent → cloning (into a staging directory)
//! → present → refreshing (`fetch <url> HEAD` + `reset --hard FETCH_HEAD`).
//! A failed clone never leaves a directory at the mirror path.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::askpass::CredentialRelay;
use crate::contract::{FileKind, FileNode, GitManager};
use crate::error::MirrorError;
use crate::path_guard;
use crate::repository::{require_https, Repository};

/// Hardening applied to every network-facing verb.
const NETWORK_CONFIG: [&str; 6] = [
    "-c",
    "credential.helper=",
    "-c",
    "protocol.allow=never",
    "-c",
    "protocol.https.allow=always",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitVerb {
    Clone,
    Fetch,
    Reset,
    LsTree,
    LsFiles,
}

impl GitVerb {
    /// Map a requested verb onto the allow-list.
    pub fn parse(verb: &str) -> Result<Self, MirrorError> {
        match verb {
            "clone" => Ok(GitVerb::Clone),
            "fetch" => Ok(GitVerb::Fetch),
            "reset" => Ok(GitVerb::Reset),
            "ls-tree" | "list-tree" => Ok(GitVerb::LsTree),
            "ls-files" | "list-files" => Ok(GitVerb::LsFiles),
            other => Err(MirrorError::CommandNotAllowed {
                verb: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GitVerb::Clone => "clone",
            GitVerb::Fetch => "fetch",
            GitVerb::Reset => "reset",
            GitVerb::LsTree => "ls-tree",
            GitVerb::LsFiles => "ls-files",
        }
    }

    fn touches_network(self) -> bool {
        matches!(self, GitVerb::Clone | GitVerb::Fetch)
    }
}

/// A `git` executable plus the bound applied to each run.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("git", timeout)
    }

    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Run an allow-listed verb and return its stdout.
    ///
    /// `remote` only labels errors; it is never passed to the process by this function.
    pub async fn run<I, S>(
        &self,
        verb: &str,
        args: I,
        cwd: Option<&Path>,
        relay: Option<&CredentialRelay>,
        remote: &str,
    ) -> Result<Vec<u8>, MirrorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let verb = GitVerb::parse(verb)?;

        let mut cmd = Command::new(&self.program);
        if verb.touches_network() {
            cmd.args(NETWORK_CONFIG);
        }
        cmd.arg(verb.as_str()).args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        if let Some(home) = std::env::var_os("HOME") {
            cmd.env("HOME", home);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(relay) = relay {
            cmd.envs(relay.envs());
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(verb = verb.as_str(), remote, authenticated = relay.is_some(), "Running git");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(error = ?e, verb = verb.as_str(), "Failed to launch git process");
                return Err(MirrorError::Git {
                    verb: verb.as_str(),
                    remote: remote.to_string(),
                    stderr: format!("failed to launch {}: {e}", self.program.display()),
                });
            }
            Err(_) => {
                error!(verb = verb.as_str(), remote, secs = self.timeout.as_secs(), "git timed out");
                return Err(MirrorError::Timeout {
                    operation: format!("git {} ({remote})", verb.as_str()),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(verb = verb.as_str(), remote, status = ?output.status, stderr = %stderr, "git exited with non-zero code");
            return Err(MirrorError::Git {
                verb: verb.as_str(),
                remote: remote.to_string(),
                stderr,
            });
        }
        Ok(output.stdout)
    }
}

/// [`GitManager`] backed by the local `git` binary.
#[derive(Debug, Clone)]
pub struct LocalGitManager {
    base_path: PathBuf,
    git: GitCli,
}

impl LocalGitManager {
    pub fn new(base_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::with_git(base_path, GitCli::new(timeout))
    }

    pub fn with_git(base_path: impl Into<PathBuf>, git: GitCli) -> Self {
        Self {
            base_path: base_path.into(),
            git,
        }
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    async fn require_mirror(&self, repo: &Repository) -> Result<PathBuf, MirrorError> {
        let mirror = self.mirror_path(repo);
        if has_git_dir(&mirror).await {
            Ok(mirror)
        } else {
            Err(MirrorError::MirrorMissing {
                repository: repo.id().to_string(),
                path: mirror,
            })
        }
    }

    async fn clone_fresh(&self, repo: &Repository, mirror: &Path) -> Result<(), MirrorError> {
        let staging = self
            .base_path
            .join(format!(".{}.staging-{}", repo.id(), Uuid::new_v4()));
        let relay = CredentialRelay::for_token(repo.access_token());

        let cloned = self
            .git
            .run(
                "clone",
                [
                    OsStr::new("--quiet"),
                    OsStr::new("--"),
                    OsStr::new(repo.url()),
                    staging.as_os_str(),
                ],
                None,
                relay.as_ref(),
                repo.url(),
            )
            .await;
        if let Err(e) = cloned {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = ?cleanup, path = %staging.display(), "Failed to remove staging clone");
                }
            }
            return Err(e);
        }

        if tokio::fs::try_exists(mirror).await.unwrap_or(false) {
            warn!(path = %mirror.display(), "Replacing non-git directory at mirror path");
            tokio::fs::remove_dir_all(mirror)
                .await
                .map_err(|e| MirrorError::io(mirror, e))?;
        }
        tokio::fs::rename(&staging, mirror)
            .await
            .map_err(|e| MirrorError::io(mirror, e))?;

        info!(repo_url = repo.url(), path = %mirror.display(), "Successfully cloned git repository");
        Ok(())
    }

    async fn refresh(&self, repo: &Repository, mirror: &Path) -> Result<(), MirrorError> {
        let relay = CredentialRelay::for_token(repo.access_token());
        self.git
            .run(
                "fetch",
                ["--quiet", "--", repo.url(), "HEAD"],
                Some(mirror),
                relay.as_ref(),
                repo.url(),
            )
            .await?;
        drop(relay);

        self.git
            .run(
                "reset",
                ["--hard", "--quiet", "FETCH_HEAD"],
                Some(mirror),
                None,
                repo.url(),
            )
            .await?;

        info!(repo_url = repo.url(), path = %mirror.display(), "Refreshed mirror to remote head");
        Ok(())
    }

    /// Files in the git index, re-read on every call.
    async fn index_files(&self, repo: &Repository) -> Result<Vec<String>, MirrorError> {
        let mirror = self.require_mirror(repo).await?;
        let stdout = self
            .git
            .run("ls-files", ["-z"], Some(&mirror), None, repo.url())
            .await?;
        Ok(split_nul(&stdout).map(str::to_string).collect())
    }
}

async fn has_git_dir(mirror: &Path) -> bool {
    tokio::fs::metadata(mirror.join(".git"))
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

fn split_nul(stdout: &[u8]) -> impl Iterator<Item = &str> + '_ {
    stdout
        .split(|b| *b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| std::str::from_utf8(record).ok())
}

/// Parse `git ls-tree -r -t -z` records: `<mode> <type> <oid>\t<path>`.
pub fn parse_ls_tree(stdout: &[u8]) -> Vec<FileNode> {
    split_nul(stdout)
        .filter_map(|record| {
            let (meta, path) = record.split_once('\t')?;
            let kind = match meta.split(' ').nth(1)? {
                "blob" => FileKind::File,
                "tree" => FileKind::Dir,
                // Submodules and anything else have no content in this mirror.
                _ => return None,
            };
            Some(FileNode {
                path: path.to_string(),
                kind,
            })
        })
        .collect()
}

#[async_trait]
impl GitManager for LocalGitManager {
    async fn ensure_cloned(&self, repo: &Repository) -> Result<(), MirrorError> {
        require_https(repo.url())?;
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| MirrorError::io(&self.base_path, e))?;

        let mirror = self.mirror_path(repo);
        if has_git_dir(&mirror).await {
            self.refresh(repo, &mirror).await
        } else {
            self.clone_fresh(repo, &mirror).await
        }
    }

    async fn list_repository_files(
        &self,
        repo: &Repository,
    ) -> Result<Vec<FileNode>, MirrorError> {
        let mirror = self.require_mirror(repo).await?;
        let stdout = self
            .git
            .run(
                "ls-tree",
                ["-r", "-t", "-z", "--full-tree", "HEAD"],
                Some(&mirror),
                None,
                repo.url(),
            )
            .await?;
        let files = parse_ls_tree(&stdout);
        debug!(repository = %repo.id(), count = files.len(), "Listed tracked files");
        Ok(files)
    }

    async fn validate_files_exist(
        &self,
        repo: &Repository,
        paths: &[String],
    ) -> Result<(), MirrorError> {
        if paths.is_empty() {
            return Ok(());
        }
        let wanted = paths
            .iter()
            .map(|p| path_guard::checked_relative(p))
            .collect::<Result<Vec<_>, _>>()?;

        let index = self.index_files(repo).await?;
        let tracked: HashSet<&str> = index.iter().map(String::as_str).collect();
        let repository = repo.id().to_string();
        for path in &wanted {
            path_guard::ensure_tracked(&repository, path, &tracked)?;
        }
        Ok(())
    }

    async fn read_managed_file_content(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Vec<u8>, MirrorError> {
        let relative = path_guard::checked_relative(path)?;

        let index = self.index_files(repo).await?;
        let tracked: HashSet<&str> = index.iter().map(String::as_str).collect();
        path_guard::ensure_tracked(&repo.id().to_string(), &relative, &tracked)?;

        let mirror = self.mirror_path(repo);
        let target = path_guard::resolve(&mirror, &relative)?;
        let target = path_guard::confine_existing(&mirror, &target).await?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| MirrorError::io(&target, e))
    }

    fn mirror_path(&self, repo: &Repository) -> PathBuf {
        self.base_path.join(repo.id().to_string())
    }
}
