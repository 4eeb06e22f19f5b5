/// # docsync CLI interface
///
/// Command parsing and orchestration only. Mirroring, read confinement, token
/// encryption and Markdown aggregation all live in `docsync-core`; this module
/// loads the config, builds a [`DocumentService`] and prints results.
///
/// Logs go to stderr; stdout carries command output (listings, exported
/// Markdown, envelopes, keys) so it can be piped.
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docsync_core::crypto::TokenEncryptor;
use docsync_core::synchronise::DocumentService;
use docsync_core::{FileKind, Repository};
use tokio::io::AsyncReadExt;

use crate::load_config::{encryptor_from_env, load_config, CliConfig};

pub const TOKEN_ENV: &str = "DOCSYNC_TOKEN";

/// CLI for docsync: mirror documentation repositories and export their Markdown.
#[derive(Parser)]
#[clap(
    name = "docsync",
    version,
    about = "Mirror documentation repositories to disk and export selected Markdown"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring every configured repository's mirror up to date
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// List the tracked files of one repository
    Ls {
        #[clap(long)]
        config: PathBuf,
        /// Repository name as written in the config
        #[clap(long)]
        repo: String,
    },
    /// Select files of one repository and print their concatenated Markdown
    Export {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        repo: String,
        /// Repository-relative path; repeat to select several
        #[clap(long = "file", required = true)]
        files: Vec<String>,
        /// Write to this file instead of stdout
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Encrypt an access token (from DOCSYNC_TOKEN or stdin) for the config file
    SealToken,
    /// Print a fresh base64-encoded 256-bit encryption key
    GenKey,
}

struct Session {
    config: CliConfig,
    encryptor: TokenEncryptor,
    service: DocumentService,
}

impl Session {
    fn open(config: PathBuf) -> Result<Self> {
        let config = load_config(config)?;
        let encryptor = encryptor_from_env()?;
        let service = DocumentService::new(config.mirror.build_manager());
        Ok(Self {
            config,
            encryptor,
            service,
        })
    }

    /// Look up a repository, syncing it first when no mirror exists yet.
    async fn mirrored(&self, name: &str) -> Result<Repository> {
        let repo = self.config.repository(name, &self.encryptor)?;
        let mirror = self.service.manager().mirror_path(&repo);
        if !tokio::fs::try_exists(&mirror).await.unwrap_or(false) {
            tracing::info!(repository = %repo.id(), name, "No mirror yet, syncing first");
            self.service.sync(&repo).await?;
        }
        Ok(repo)
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let session = Session::open(config)?;
            let repos = session.config.repositories(&session.encryptor)?;
            tracing::info!(command = "sync", repositories = repos.len(), "Starting synchronisation");
            match session.service.sync_all(&repos).await {
                Ok(report) => {
                    tracing::info!(command = "sync", ?report, "Synchronisation complete");
                    for r in &report.repositories {
                        println!("{}\t{}\t{} files", r.name, r.repository_id, r.files);
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(e.into())
                }
            }
        }
        Commands::Ls { config, repo } => {
            let session = Session::open(config)?;
            let repo = session.mirrored(&repo).await?;
            let files = session.service.list_files(&repo).await?;
            let mut stdout = std::io::stdout().lock();
            for node in files {
                match node.kind {
                    FileKind::Dir => writeln!(stdout, "{}/", node.path)?,
                    FileKind::File => writeln!(stdout, "{}", node.path)?,
                }
            }
            Ok(())
        }
        Commands::Export {
            config,
            repo,
            files,
            output,
        } => {
            let session = Session::open(config)?;
            let repo = session.mirrored(&repo).await?;
            let selected = session.service.select_files(&repo, &files).await?;
            let markdown = session.service.get_selected_markdown(&repo).await?;
            tracing::info!(
                command = "export",
                repository = %repo.id(),
                files = selected.len(),
                bytes = markdown.len(),
                "Exported markdown"
            );
            match output {
                Some(path) => tokio::fs::write(&path, &markdown)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().lock().write_all(&markdown)?,
            }
            Ok(())
        }
        Commands::SealToken => {
            let encryptor = encryptor_from_env()?;
            let token = match std::env::var(TOKEN_ENV) {
                Ok(token) => token,
                Err(_) => {
                    let mut input = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut input)
                        .await
                        .context("reading token from stdin")?;
                    input
                }
            };
            let token = token.trim();
            if token.is_empty() {
                bail!("no token given: set {TOKEN_ENV} or pipe it on stdin");
            }
            println!("{}", encryptor.encrypt(token)?);
            Ok(())
        }
        Commands::GenKey => {
            println!("{}", TokenEncryptor::generate_key());
            Ok(())
        }
    }
}

