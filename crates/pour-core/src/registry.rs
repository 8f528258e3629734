//! HTTP access to the formula API and the bottle registry.
//!
//! Every fetch is cache-first: an existing [`CacheStore`] entry is returned
//! without touching the network. Registry requests carry the OCI index
//! `Accept` header, the configured bearer token and the client `User-Agent`.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use pour_schema::{Formula, Manifest, OCI_INDEX_MEDIA_TYPE};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::cache::{CacheKey, CacheStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reporter::Reporter;

/// Upper bound on the response body kept for a failed request.
pub const MAX_ERROR_BODY: usize = 4 * 1024;

/// Client for the formula API and bottle registry.
#[derive(Clone)]
pub struct Registry {
    client: Client,
    api_root: String,
    bearer: String,
    user_agent: String,
    cache: CacheStore,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("api_root", &self.api_root)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Build a registry client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let client = match &config.http_client {
            Some(client) => client.clone(),
            None => Client::builder()
                .user_agent(&config.user_agent)
                .build()
                .map_err(|e| transport(&config.api_root, &e))?,
        };
        Ok(Self {
            client,
            api_root: crate::config::normalize_api_root(&config.api_root),
            bearer: config.bearer_token.clone(),
            user_agent: config.user_agent.clone(),
            cache: CacheStore::new(&config.cache_root),
            reporter,
        })
    }

    /// The cache backing this client.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Path of the cached index, downloading it first when absent.
    ///
    /// # Errors
    ///
    /// Fails as [`download_index`](Self::download_index) does.
    pub async fn index(&self) -> Result<PathBuf> {
        let path = self.cache.path(&CacheKey::Index);
        if path.exists() {
            self.reporter.cache_hit(&path);
            return Ok(path);
        }
        self.download_index().await
    }

    /// Download `formula.json` into the cache, replacing any existing copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] for a failed request and [`Error::Io`]
    /// when the cache entry cannot be written.
    pub async fn download_index(&self) -> Result<PathBuf> {
        let url = format!("{}formula.json", self.api_root);
        tracing::debug!(%url, "downloading formula index");

        let response = self.get(&url).await?;
        let staged = self.cache.stage(&CacheKey::Index).await?;
        stream_to(response, &url, staged.path(), None).await?;
        self.cache.commit(staged, &CacheKey::Index).await
    }

    /// Fetch a single formula record from the API.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] for a failed request and [`Error::Decode`]
    /// for a malformed record.
    pub async fn fetch_formula(&self, name: &str) -> Result<Formula> {
        let url = format!("{}formula/{name}.json", self.api_root);
        let bytes = self.get_bytes(&url).await?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Decode {
            what: format!("formula {name}"),
            source,
        })
    }

    /// Fetch and decode a formula's manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] for a failed request, [`Error::Decode`]
    /// for a malformed manifest and [`Error::Io`] for cache failures.
    pub async fn fetch_manifest(&self, formula: &Formula) -> Result<Manifest> {
        let key = CacheKey::manifest(formula);
        if let Some(bytes) = self.cache.read(&key).await? {
            self.reporter.cache_hit(&self.cache.path(&key));
            return Ok(Manifest::from_slice(&bytes)?);
        }

        let url = formula.manifest_url();
        tracing::debug!(formula = %formula.name, %url, "fetching manifest");
        let bytes = self.get_bytes(&url).await?;
        let manifest = Manifest::from_slice(&bytes)?;
        self.cache.write(&key, &bytes).await?;
        Ok(manifest)
    }

    /// Download a formula's bottle for `tag` into the cache.
    ///
    /// The archive is hashed while streaming and only committed to the cache
    /// when it matches the index checksum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingBottle`] when the formula has no bottle for
    /// `tag`, [`Error::ChecksumMismatch`] when the download does not hash to
    /// the index checksum, and [`Error::Transport`] or [`Error::Io`] otherwise.
    pub async fn download_bottle(&self, formula: &Formula, tag: &str) -> Result<PathBuf> {
        let key = CacheKey::bottle(formula);
        let path = self.cache.path(&key);
        if path.exists() {
            self.reporter.cache_hit(&path);
            return Ok(path);
        }

        let file = formula
            .bottle_for(tag)
            .ok_or_else(|| Error::MissingBottle {
                formula: formula.name.clone(),
                tag: tag.to_string(),
            })?;
        tracing::debug!(formula = %formula.name, url = %file.url, "downloading bottle");

        let response = self.get(&file.url).await?;
        let staged = self.cache.stage(&key).await?;
        stream_to(response, &file.url, staged.path(), Some(&file.checksum)).await?;
        self.cache.commit(staged, &key).await
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response.bytes().await.map_err(|e| transport(url, &e))?;
        Ok(bytes.to_vec())
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, OCI_INDEX_MEDIA_TYPE)
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer))
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| transport(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                url: url.to_string(),
                status: Some(status.as_u16()),
                body: capture_body(response).await,
            });
        }
        Ok(response)
    }
}

/// Stream a response body to `dest`, optionally verifying its SHA-256.
async fn stream_to(
    response: Response,
    url: &str,
    dest: &std::path::Path,
    expected: Option<&str>,
) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(dest)
        .await
        .map_err(|e| Error::io(dest, e))?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport(url, &e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io(dest, e))?;
        hasher.update(&chunk);
    }
    file.flush().await.map_err(|e| Error::io(dest, e))?;

    if let Some(expected) = expected {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(())
}

async fn capture_body(response: Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let room = MAX_ERROR_BODY - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= MAX_ERROR_BODY {
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

fn transport(url: &str, err: &reqwest::Error) -> Error {
    Error::Transport {
        url: url.to_string(),
        status: err.status().map(|s| s.as_u16()),
        body: err.to_string(),
    }
}
