//! Error types shared by every docsync-core component.
//!
//! [`MirrorError`] covers configuration problems, policy violations (rejected
//! before any I/O happens), transient external failures and local I/O.
//! [`CryptoError`] is kept separate so that token decryption failures can never
//! be mistaken for a parse or transport problem.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("git verb '{verb}' is not in the allow-list")]
    CommandNotAllowed { verb: String },

    #[error("remote '{url}' rejected: only https:// remotes are allowed")]
    InsecureUrl { url: String },

    #[error("remote '{url}' is not a recognised <host>/<owner>/<repo> address")]
    InvalidRemote { url: String },

    #[error("path '{path}' escapes the mirror root")]
    PathTraversal { path: String },

    #[error("path '{path}' is not a tracked file of repository {repository}")]
    UntrackedFile { repository: String, path: String },

    #[error("mirror for repository {repository} is missing at {}", path.display())]
    MirrorMissing { repository: String, path: PathBuf },

    #[error("git {verb} failed for {remote}: {stderr}")]
    Git {
        verb: &'static str,
        remote: String,
        stderr: String,
    },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("provider returned {status} for {url}: {body}")]
    Provider {
        url: String,
        status: u16,
        body: String,
    },

    #[error("provider rate limit exhausted for {url}")]
    RateLimited { url: String },

    #[error("could not decode content of '{path}': {reason}")]
    Decode { path: String, reason: String },

    #[error("token of repository {repository} could not be decrypted: {source}")]
    Crypto {
        repository: String,
        #[source]
        source: CryptoError,
    },

    #[error("failed to read '{path}' while aggregating: {source}")]
    AggregateRead {
        path: String,
        #[source]
        source: Box<MirrorError>,
    },

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MirrorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for rejections that happen before any process or network I/O.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            MirrorError::CommandNotAllowed { .. }
                | MirrorError::InsecureUrl { .. }
                | MirrorError::PathTraversal { .. }
                | MirrorError::UntrackedFile { .. }
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("encryption key is not valid base64")]
    InvalidKeyEncoding,

    #[error("envelope is not valid base64")]
    MalformedEnvelope,

    #[error("envelope is {0} bytes, shorter than nonce and tag")]
    EnvelopeTooShort(usize),

    #[error("authentication failed: wrong key or tampered envelope")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decrypted token is not valid UTF-8")]
    InvalidUtf8,
}
