/// `load_config` module: reads the static YAML config and injects the encryption key from the environment.
///
/// This is the only place where untrusted YAML is parsed. The file carries no
/// plaintext secrets: repository tokens appear as envelopes produced by
/// `docsync seal-token`, and the key that opens them comes from
/// `DOCSYNC_ENCRYPTION_KEY`.
///
/// # Errors
/// Everything here returns `anyhow::Error` with context, surfaced at the CLI boundary.
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use docsync_core::config::MirrorConfig;
use docsync_core::crypto::TokenEncryptor;
use docsync_core::{Repository, StoredRepository};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const KEY_ENV: &str = "DOCSYNC_ENCRYPTION_KEY";
pub const MODE_ENV: &str = "DOCSYNC_ENV";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

/// One configured repository. `token` is an envelope, never a plaintext token.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub token: Option<String>,
}

impl RepositoryEntry {
    pub fn id(&self) -> Uuid {
        self.id.unwrap_or_else(|| Repository::id_for_url(&self.url))
    }

    fn stored(&self) -> StoredRepository {
        StoredRepository::new(
            self.id(),
            &self.name,
            &self.url,
            self.token.clone().unwrap_or_default(),
        )
    }
}

impl CliConfig {
    /// Decrypt every configured repository.
    pub fn repositories(&self, encryptor: &TokenEncryptor) -> Result<Vec<Repository>> {
        self.repositories
            .iter()
            .map(|entry| {
                entry
                    .stored()
                    .unseal(encryptor)
                    .with_context(|| format!("repository '{}'", entry.name))
            })
            .collect()
    }

    pub fn repository(&self, name: &str, encryptor: &TokenEncryptor) -> Result<Repository> {
        let entry = self
            .repositories
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!("no repository named '{name}' in config"))?;
        entry
            .stored()
            .unseal(encryptor)
            .with_context(|| format!("repository '{name}'"))
    }
}

/// Loads the YAML config file and validates repository names are unique.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let mut names: Vec<&str> = config.repositories.iter().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
        bail!("repository name '{}' appears more than once", dup[0]);
    }

    config.mirror.trace_loaded();
    info!(
        config_path = ?path_ref,
        repositories = config.repositories.len(),
        "Parsed config YAML successfully"
    );
    Ok(config)
}

/// Build the token encryptor from `DOCSYNC_ENCRYPTION_KEY`.
///
/// Without a key, development mode (`DOCSYNC_ENV=development`) falls back to a
/// throwaway key; every other mode refuses to start.
pub fn encryptor_from_env() -> Result<TokenEncryptor> {
    match std::env::var(KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => TokenEncryptor::from_base64_key(key.trim())
            .with_context(|| format!("{KEY_ENV} is not a usable key")),
        _ => {
            let development = std::env::var(MODE_ENV)
                .map(|m| m.eq_ignore_ascii_case("development"))
                .unwrap_or(false);
            if !development {
                bail!("{KEY_ENV} must be set (base64 of 32 bytes); run `docsync gen-key` to create one");
            }
            warn!(
                "{KEY_ENV} not set: using an ephemeral key, tokens sealed now will not open after exit"
            );
            TokenEncryptor::from_base64_key(&TokenEncryptor::generate_key())
                .context("ephemeral key generation failed")
        }
    }
}
