use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::contract::GitManager;
use crate::git_cli::LocalGitManager;
use crate::github::{ClientCache, GitHubManager, DEFAULT_API_BASE};

/// Which sync strategy mirrors repositories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Local `git` binary.
    #[default]
    Git,
    /// Hosted provider content API.
    Github,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub base_path: PathBuf,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base_url: String,
}

fn default_command_timeout() -> u64 {
    120
}

fn default_http_timeout() -> u64 {
    30
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl MirrorConfig {
    pub fn new(base_path: impl Into<PathBuf>, strategy: Strategy) -> Self {
        Self {
            base_path: base_path.into(),
            strategy,
            command_timeout_secs: default_command_timeout(),
            http_timeout_secs: default_http_timeout(),
            api_base_url: default_api_base(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            base_path = %self.base_path.display(),
            strategy = ?self.strategy,
            "Loaded MirrorConfig"
        );
        debug!(?self, "MirrorConfig loaded (full debug)");
    }

    /// Instantiate the configured strategy behind the facade.
    pub fn build_manager(&self) -> Arc<dyn GitManager> {
        match self.strategy {
            Strategy::Git => Arc::new(LocalGitManager::new(
                &self.base_path,
                Duration::from_secs(self.command_timeout_secs),
            )),
            Strategy::Github => Arc::new(GitHubManager::with_api_base(
                &self.base_path,
                &self.api_base_url,
                Arc::new(ClientCache::new(Duration::from_secs(self.http_timeout_secs))),
            )),
        }
    }
}
