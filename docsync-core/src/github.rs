//! Hosted-API sync strategy: mirrors a repository through GitHub's contents API.
//!
//! `ensure_cloned` walks `/repos/{owner}/{repo}/contents/{path}` directory by
//! directory, downloads every file into a staging directory and, once the whole
//! tree arrived, swaps it into the mirror root (old contents removed, root kept).
//! Paths returned by the provider go through [`path_guard`] like any other input.
//!
//! API clients live in a [`ClientCache`] keyed by token, so each credential keeps
//! its own identity and rate limit without rebuilding a client per call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{stream, StreamExt, TryStreamExt};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::contract::{FileNode, GitManager};
use crate::error::MirrorError;
use crate::path_guard;
use crate::repository::{require_https, Repository};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const CLIENT_USER_AGENT: &str = concat!("docsync/", env!("CARGO_PKG_VERSION"));
const FETCH_CONCURRENCY: usize = 8;

/// Configured API clients, one per distinct token (`""` for anonymous).
///
/// Entries live as long as the cache; the key space is bounded by the tokens in use.
pub struct ClientCache {
    timeout: Duration,
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache")
            .field("timeout", &self.timeout)
            .field("clients", &self.len())
            .finish()
    }
}

impl ClientCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn client_for(&self, token: Option<&str>) -> Result<reqwest::Client, MirrorError> {
        let key = token.unwrap_or("");
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }
        let client = self.build_client(key)?;
        clients.insert(key.to_string(), client.clone());
        debug!(authenticated = !key.is_empty(), cached = clients.len(), "Built hosted API client");
        Ok(client)
    }

    fn build_client(&self, token: &str) -> Result<reqwest::Client, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        if !token.is_empty() {
            let mut bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                MirrorError::Config("access token is not a valid header value".to_string())
            })?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build HTTP client: {e}")))
    }
}

/// `owner/repo` pair addressed by a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub owner: String,
    pub name: String,
}

pub fn parse_remote(url: &str) -> Result<RemoteRepo, MirrorError> {
    require_https(url)?;
    let pattern = Regex::new(r"(?i)^https://[^/@\s]+/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$")
        .map_err(|e| MirrorError::Config(e.to_string()))?;
    let invalid = || MirrorError::InvalidRemote {
        url: url.to_string(),
    };
    let caps = pattern.captures(url).ok_or_else(invalid)?;
    let owner = caps[1].to_string();
    let name = caps[2].to_string();
    if [&owner, &name].iter().any(|s| s.as_str() == "." || s.as_str() == "..") {
        return Err(invalid());
    }
    Ok(RemoteRepo { owner, name })
}

#[derive(Debug, Clone, Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentEntry>),
    Single(ContentEntry),
}

fn http_error(url: &Url, e: reqwest::Error, timeout: Duration) -> MirrorError {
    if e.is_timeout() {
        MirrorError::Timeout {
            operation: format!("GET {url}"),
            secs: timeout.as_secs(),
        }
    } else {
        MirrorError::Http {
            url: url.to_string(),
            source: e,
        }
    }
}

/// [`GitManager`] backed by the hosted provider's REST API.
#[derive(Debug, Clone)]
pub struct GitHubManager {
    base_path: PathBuf,
    api_base: String,
    timeout: Duration,
    clients: Arc<ClientCache>,
}

impl GitHubManager {
    pub fn new(base_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::with_api_base(
            base_path,
            DEFAULT_API_BASE,
            Arc::new(ClientCache::new(timeout)),
        )
    }

    /// Point at another API root and share an existing client cache.
    pub fn with_api_base(
        base_path: impl Into<PathBuf>,
        api_base: impl Into<String>,
        clients: Arc<ClientCache>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            api_base: api_base.into(),
            timeout: clients.timeout,
            clients,
        }
    }

    pub fn client_cache(&self) -> &Arc<ClientCache> {
        &self.clients
    }

    fn contents_url(&self, remote: &RemoteRepo, path: &str) -> Result<Url, MirrorError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| MirrorError::Config(format!("api base '{}': {e}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| MirrorError::Config(format!("api base '{}' cannot be a base", self.api_base)))?
            .pop_if_empty()
            .extend(["repos", remote.owner.as_str(), remote.name.as_str(), "contents"])
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn get(&self, client: &reqwest::Client, url: Url) -> Result<reqwest::Response, MirrorError> {
        let resp = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| http_error(&url, e, self.timeout))?;

        let status = resp.status();
        let exhausted = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");
        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
            warn!(url = %url, status = %status, "Hosted API rate limit exhausted");
            return Err(MirrorError::RateLimited {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            return Err(MirrorError::Provider {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn get_contents(
        &self,
        client: &reqwest::Client,
        remote: &RemoteRepo,
        path: &str,
    ) -> Result<ContentsResponse, MirrorError> {
        let url = self.contents_url(remote, path)?;
        let resp = self.get(client, url.clone()).await?;
        resp.json::<ContentsResponse>()
            .await
            .map_err(|e| http_error(&url, e, self.timeout))
    }

    /// Breadth-first walk of the remote tree. Entry paths are validated here.
    ///
    /// Every entry must be a direct child of the directory being listed and no
    /// directory is listed twice, so a misbehaving provider cannot keep the walk going.
    async fn walk_remote(
        &self,
        client: &reqwest::Client,
        remote: &RemoteRepo,
    ) -> Result<Vec<FileNode>, MirrorError> {
        let mut nodes = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending = VecDeque::from([String::new()]);
        while let Some(dir) = pending.pop_front() {
            if !visited.insert(dir.clone()) {
                return Err(MirrorError::Decode {
                    path: dir,
                    reason: "directory listed more than once".to_string(),
                });
            }
            let entries = match self.get_contents(client, remote, &dir).await? {
                ContentsResponse::Listing(entries) => entries,
                ContentsResponse::Single(entry) => vec![entry],
            };
            for entry in entries {
                let path = path_guard::checked_relative(&entry.path)?;
                if path.is_empty() {
                    return Err(MirrorError::PathTraversal { path: entry.path });
                }
                if !is_direct_child(&dir, &path) {
                    return Err(MirrorError::Decode {
                        path,
                        reason: format!("not a direct child of '{dir}'"),
                    });
                }
                match entry.kind.as_str() {
                    "file" => nodes.push(FileNode::file(path)),
                    "dir" => {
                        pending.push_back(path.clone());
                        nodes.push(FileNode::dir(path));
                    }
                    other => debug!(path = %path, kind = other, "Skipping non-file content entry"),
                }
            }
        }
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(nodes)
    }

    /// Client for a provider-supplied blob URL.
    ///
    /// Same origin as the API keeps the credentialed client. Any other origin must
    /// be https and gets the anonymous client, so the token never leaves the API host.
    fn blob_client(
        &self,
        client: &reqwest::Client,
        url: &Url,
        path: &str,
    ) -> Result<reqwest::Client, MirrorError> {
        let api = Url::parse(&self.api_base)
            .map_err(|e| MirrorError::Config(format!("api base '{}': {e}", self.api_base)))?;
        if api.origin() == url.origin() {
            return Ok(client.clone());
        }
        if url.scheme() != "https" {
            warn!(path, url = %url, "Refusing non-https download url from provider");
            return Err(MirrorError::Decode {
                path: path.to_string(),
                reason: format!("download url '{url}' is not https"),
            });
        }
        self.clients.client_for(None)
    }

    async fn fetch_file(
        &self,
        client: &reqwest::Client,
        remote: &RemoteRepo,
        path: &str,
    ) -> Result<Vec<u8>, MirrorError> {
        let entry = match self.get_contents(client, remote, path).await? {
            ContentsResponse::Single(entry) => entry,
            ContentsResponse::Listing(_) => {
                return Err(MirrorError::Decode {
                    path: path.to_string(),
                    reason: "provider returned a directory listing".to_string(),
                })
            }
        };

        match (entry.encoding.as_deref(), entry.content.as_deref()) {
            (Some("base64"), Some(content)) => {
                let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD.decode(compact).map_err(|e| MirrorError::Decode {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            }
            (Some("utf-8"), Some(content)) => Ok(content.as_bytes().to_vec()),
            _ => {
                // Large files come back with `encoding: none`; fetch the raw blob instead.
                let raw = entry.download_url.ok_or_else(|| MirrorError::Decode {
                    path: path.to_string(),
                    reason: "no inline content and no download url".to_string(),
                })?;
                let url = Url::parse(&raw).map_err(|e| MirrorError::Decode {
                    path: path.to_string(),
                    reason: format!("bad download url: {e}"),
                })?;
                let blob_client = self.blob_client(client, &url, path)?;
                let resp = self.get(&blob_client, url.clone()).await?;
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| http_error(&url, e, self.timeout))?;
                Ok(bytes.to_vec())
            }
        }
    }

    async fn download_into(
        &self,
        client: &reqwest::Client,
        remote: &RemoteRepo,
        nodes: &[FileNode],
        staging: &Path,
    ) -> Result<(), MirrorError> {
        let mut files = Vec::new();
        for node in nodes {
            if node.is_file() {
                files.push(node.clone());
            } else {
                let target = path_guard::resolve(staging, &node.path)?;
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| MirrorError::io(&target, e))?;
            }
        }

        stream::iter(files)
            .map(|node| self.write_one(client, remote, staging, node))
            .buffer_unordered(FETCH_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn write_one(
        &self,
        client: &reqwest::Client,
        remote: &RemoteRepo,
        staging: &Path,
        node: FileNode,
    ) -> Result<(), MirrorError> {
        let target = path_guard::resolve(staging, &node.path)?;
        let content = self.fetch_file(client, remote, &node.path).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::io(parent, e))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| MirrorError::io(&target, e))
    }

    async fn api_listing(&self, repo: &Repository) -> Result<Vec<FileNode>, MirrorError> {
        let remote = parse_remote(repo.url())?;
        let client = self.clients.client_for(repo.access_token())?;
        self.walk_remote(&client, &remote).await
    }
}

fn is_direct_child(dir: &str, path: &str) -> bool {
    let rest = if dir.is_empty() {
        path
    } else {
        match path.strip_prefix(dir).and_then(|r| r.strip_prefix('/')) {
            Some(rest) => rest,
            None => return false,
        }
    };
    !rest.is_empty() && !rest.contains('/')
}

async fn remove_staging(staging: &Path) {
    if let Err(cleanup) = tokio::fs::remove_dir_all(staging).await {
        if cleanup.kind() != std::io::ErrorKind::NotFound {
            warn!(error = ?cleanup, path = %staging.display(), "Failed to remove staging mirror");
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// [`local_listing`] on the blocking pool.
async fn local_listing_blocking(mirror: PathBuf) -> Result<Vec<FileNode>, MirrorError> {
    let path = mirror.clone();
    tokio::task::spawn_blocking(move || local_listing(&mirror))
        .await
        .map_err(|e| MirrorError::io(path, std::io::Error::other(e)))?
}

/// Replace everything inside `mirror` with the children of `staging`.
async fn swap_into(staging: &Path, mirror: &Path) -> Result<(), MirrorError> {
    if tokio::fs::try_exists(mirror).await.unwrap_or(false) {
        let mut existing = tokio::fs::read_dir(mirror)
            .await
            .map_err(|e| MirrorError::io(mirror, e))?;
        while let Some(entry) = existing
            .next_entry()
            .await
            .map_err(|e| MirrorError::io(mirror, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| MirrorError::io(&path, e))?;
            let removed = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            removed.map_err(|e| MirrorError::io(&path, e))?;
        }
    } else {
        tokio::fs::create_dir_all(mirror)
            .await
            .map_err(|e| MirrorError::io(mirror, e))?;
    }

    let mut staged = tokio::fs::read_dir(staging)
        .await
        .map_err(|e| MirrorError::io(staging, e))?;
    while let Some(entry) = staged
        .next_entry()
        .await
        .map_err(|e| MirrorError::io(staging, e))?
    {
        let target = mirror.join(entry.file_name());
        tokio::fs::rename(entry.path(), &target)
            .await
            .map_err(|e| MirrorError::io(&target, e))?;
    }
    tokio::fs::remove_dir(staging)
        .await
        .map_err(|e| MirrorError::io(staging, e))
}

/// Walk the mirror on disk, skipping hidden entries.
pub fn local_listing(mirror: &Path) -> Result<Vec<FileNode>, MirrorError> {
    let mut nodes = Vec::new();
    let walker = WalkDir::new(mirror)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
        });
    for entry in walker {
        let entry = entry.map_err(|e| MirrorError::io(mirror, e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(mirror)
            .map_err(|_| MirrorError::PathTraversal {
                path: entry.path().display().to_string(),
            })?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file_type = entry.file_type();
        if file_type.is_dir() {
            nodes.push(FileNode::dir(path));
        } else if file_type.is_file() {
            nodes.push(FileNode::file(path));
        }
    }
    Ok(nodes)
}

#[async_trait]
impl GitManager for GitHubManager {
    async fn ensure_cloned(&self, repo: &Repository) -> Result<(), MirrorError> {
        let remote = parse_remote(repo.url())?;
        let client = self.clients.client_for(repo.access_token())?;
        info!(repo_url = repo.url(), owner = %remote.owner, name = %remote.name, "Mirroring through hosted API");

        let nodes = self.walk_remote(&client, &remote).await?;

        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| MirrorError::io(&self.base_path, e))?;
        let staging = self
            .base_path
            .join(format!(".{}.staging-{}", repo.id(), Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| MirrorError::io(&staging, e))?;

        if let Err(e) = self.download_into(&client, &remote, &nodes, &staging).await {
            remove_staging(&staging).await;
            return Err(e);
        }

        let mirror = self.mirror_path(repo);
        if let Err(e) = swap_into(&staging, &mirror).await {
            remove_staging(&staging).await;
            return Err(e);
        }
        info!(
            repo_url = repo.url(),
            path = %mirror.display(),
            files = nodes.iter().filter(|n| n.is_file()).count(),
            "Mirror refreshed from hosted API"
        );
        Ok(())
    }

    async fn list_repository_files(
        &self,
        repo: &Repository,
    ) -> Result<Vec<FileNode>, MirrorError> {
        let mirror = self.mirror_path(repo);
        if !is_dir(&mirror).await {
            debug!(repository = %repo.id(), "No local mirror, listing through hosted API");
            return self.api_listing(repo).await;
        }
        match local_listing_blocking(mirror).await {
            Ok(nodes) => Ok(nodes),
            Err(e) => {
                warn!(error = %e, repository = %repo.id(), "Local walk failed, listing through hosted API");
                self.api_listing(repo).await
            }
        }
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

        let listing = self.list_repository_files(repo).await?;
        let tracked = path_guard::tracked_files(&listing);
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
        let listing = self.list_repository_files(repo).await?;
        path_guard::ensure_tracked(
            &repo.id().to_string(),
            &relative,
            &path_guard::tracked_files(&listing),
        )?;

        let mirror = self.mirror_path(repo);
        let target = path_guard::resolve(&mirror, &relative)?;
        let local = match path_guard::confine_existing(&mirror, &target).await {
            Ok(canonical) => tokio::fs::read(&canonical)
                .await
                .map_err(|e| MirrorError::io(&canonical, e)),
            Err(e) => Err(e),
        };

        match local {
            Ok(bytes) => Ok(bytes),
            Err(MirrorError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %relative, repository = %repo.id(), "Local copy missing, fetching through hosted API");
                let remote = parse_remote(repo.url())?;
                let client = self.clients.client_for(repo.access_token())?;
                self.fetch_file(&client, &remote, &relative).await
            }
            Err(e) => Err(e),
        }
    }

    fn mirror_path(&self, repo: &Repository) -> PathBuf {
        self.base_path.join(repo.id().to_string())
    }
}
