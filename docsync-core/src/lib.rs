#![doc = "docsync-core: repository mirroring, read confinement and token protection for docsync."]

//! This crate contains the synchronisation and security layer of docsync:
//! mirroring remote documentation repositories to disk (through a local `git`
//! binary or a hosted provider's API), confining every read to tracked files of
//! a mirror, handing credentials to subprocesses, and encrypting access tokens at rest.
//!
//! # Usage
//! Build a [`config::MirrorConfig`], turn it into a [`contract::GitManager`] with
//! `build_manager()`, and drive it through [`synchronise::DocumentService`].

pub mod aggregate;
pub mod askpass;
pub mod config;
pub mod contract;
pub mod crypto;
pub mod error;
pub mod git_cli;
pub mod github;
pub mod path_guard;
pub mod repository;
pub mod synchronise;

pub use contract::{FileKind, FileNode, GitManager};
pub use error::{CryptoError, MirrorError};
pub use repository::{Repository, StoredRepository};
