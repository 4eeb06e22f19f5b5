//! Credential hand-off to a `git` subprocess without touching its argv.
//!
//! A [`CredentialRelay`] is a private temporary directory (mode 0700) holding one
//! executable script that answers git's prompts: `x-access-token` for the
//! username, the secret for the password. The subprocess finds it through
//! `GIT_ASKPASS`. Dropping the relay deletes the directory and the script.
//! Relays are built per operation and never cached.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

const SCRIPT_NAME: &str = "askpass.sh";
const TOKEN_USERNAME: &str = "x-access-token";

#[derive(Debug)]
pub struct CredentialRelay {
    dir: TempDir,
    script: PathBuf,
}

impl CredentialRelay {
    pub fn create(secret: &str) -> std::io::Result<Self> {
        if secret.is_empty() || secret.chars().any(char::is_control) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "secret must be non-empty and free of control characters",
            ));
        }

        let dir = tempfile::Builder::new()
            .prefix("docsync-askpass-")
            .tempdir()?;
        restrict_to_owner(dir.path(), 0o700)?;

        let script = dir.path().join(SCRIPT_NAME);
        let mut file = create_owner_executable(&script)?;
        file.write_all(render_script(secret).as_bytes())?;
        file.sync_all()?;
        drop(file);

        debug!(relay = %script.display(), "Created credential relay");
        Ok(Self { dir, script })
    }

    /// Relay for an optional token. Missing tokens and creation failures both
    /// yield `None`; the latter is logged so the caller proceeds unauthenticated.
    pub fn for_token(token: Option<&str>) -> Option<Self> {
        let token = token.filter(|t| !t.is_empty())?;
        match Self::create(token) {
            Ok(relay) => Some(relay),
            Err(e) => {
                warn!(error = %e, "Could not create credential relay, continuing without credentials");
                None
            }
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script
    }

    pub fn dir_path(&self) -> &Path {
        self.dir.path()
    }

    /// Environment entries pointing git at the relay.
    pub fn envs(&self) -> Vec<(&'static str, OsString)> {
        vec![("GIT_ASKPASS", self.script.clone().into_os_string())]
    }
}

fn render_script(secret: &str) -> String {
    format!(
        "#!/bin/sh\ncase \"$1\" in\n    Username*) printf '%s\\n' '{user}' ;;\n    *) printf '%s\\n' '{secret}' ;;\nesac\n",
        user = TOKEN_USERNAME,
        secret = shell_single_quote_escape(secret),
    )
}

fn shell_single_quote_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(unix)]
fn create_owner_executable(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o700)
        .open(path)
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "credential relay needs unix permissions",
    ))
}

#[cfg(not(unix))]
fn create_owner_executable(_path: &Path) -> std::io::Result<std::fs::File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "credential relay needs unix permissions",
    ))
}
