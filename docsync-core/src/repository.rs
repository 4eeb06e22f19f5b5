//! Repository records as the sync layer sees them, and their at-rest shape.
//!
//! The sync layer receives a [`Repository`] by reference and never persists it.
//! [`StoredRepository`] is what the persistence layer writes: identical except
//! that the access token is an encrypted envelope.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::TokenEncryptor;
use crate::error::{CryptoError, MirrorError};

#[derive(Clone, PartialEq, Eq)]
pub struct Repository {
    id: Uuid,
    name: String,
    url: String,
    access_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("token_set", &self.access_token.is_some())
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Repository {
    /// Register a repository under a fresh random id.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, MirrorError> {
        Self::with_id(Uuid::new_v4(), name, url, access_token)
    }

    pub fn with_id(
        id: Uuid,
        name: impl Into<String>,
        url: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, MirrorError> {
        let url = url.into();
        require_https(&url)?;
        let now = Utc::now();
        Ok(Self {
            id,
            name: name.into(),
            url,
            access_token: access_token.filter(|t| !t.is_empty()),
            created_at: now,
            updated_at: now,
        })
    }

    /// Stable id derived from the remote URL, so the same remote always maps
    /// to the same mirror directory.
    pub fn id_for_url(url: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace (or clear) the access token. The URL has no counterpart: it is fixed at creation.
    pub fn rotate_token(&mut self, token: Option<String>) {
        self.access_token = token.filter(|t| !t.is_empty());
        self.updated_at = Utc::now();
    }

    pub fn seal(&self, encryptor: &TokenEncryptor) -> Result<StoredRepository, CryptoError> {
        Ok(StoredRepository {
            id: self.id,
            name: self.name.clone(),
            url: self.url.clone(),
            token_envelope: encryptor.encrypt(self.access_token.as_deref().unwrap_or(""))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRepository {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Empty when no token is configured.
    #[serde(default)]
    pub token_envelope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRepository {
    /// A freshly registered record; both timestamps are now.
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        url: impl Into<String>,
        token_envelope: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            url: url.into(),
            token_envelope: token_envelope.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn unseal(&self, encryptor: &TokenEncryptor) -> Result<Repository, MirrorError> {
        require_https(&self.url)?;
        let token = encryptor
            .decrypt(&self.token_envelope)
            .map_err(|source| MirrorError::Crypto {
                repository: self.id.to_string(),
                source,
            })?;
        Ok(Repository {
            id: self.id,
            name: self.name.clone(),
            url: self.url.clone(),
            access_token: Some(token).filter(|t| !t.is_empty()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Re-encrypt the token envelope under a new key.
    pub fn reencrypt(
        &self,
        old: &TokenEncryptor,
        new: &TokenEncryptor,
    ) -> Result<StoredRepository, CryptoError> {
        let token = old.decrypt(&self.token_envelope)?;
        Ok(StoredRepository {
            token_envelope: new.encrypt(&token)?,
            ..self.clone()
        })
    }
}

pub(crate) fn require_https(url: &str) -> Result<(), MirrorError> {
    let lower = url.to_ascii_lowercase();
    match lower.strip_prefix("https://") {
        // Credentials embedded in the authority would leak through argv.
        Some(rest)
            if !rest.is_empty()
                && !rest.starts_with('/')
                && !rest.split('/').next().unwrap_or("").contains('@') =>
        {
            Ok(())
        }
        _ => Err(MirrorError::InsecureUrl {
            url: url.to_string(),
        }),
    }
}
