//! Persistent job store + HTTP fetch utilities for Veille.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span};
use veille_core::JobRecord;

pub const CRATE_NAME: &str = "veille-store";

/// The store's in-memory shape: id -> record, ordered for stable output.
pub type JobMap = BTreeMap<String, JobRecord>;

/// Store failures are the only fatal error class in the pipeline: without a
/// readable/writable store no progress can be safely recorded.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("writing store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("decoding store {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("encoding store: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("id {0} is already present in the store")]
    DuplicateId(String),
}

/// Durable id -> record mapping, persisted as one pretty-printed JSON object.
///
/// Load/merge/save lifecycle: loaded once at run start, mutated in memory,
/// written back once at run end as a full replacement.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted mapping. A missing file is an empty store, not an
    /// error.
    pub async fn load(&self) -> Result<JobMap, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Decode {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no existing store, starting empty");
                Ok(JobMap::new())
            }
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Pure insertion of new records. A duplicate key is a programmer error:
    /// the orchestrator must never hand the store an id it already holds.
    pub fn merge(map: &mut JobMap, records: Vec<JobRecord>) -> Result<usize, StoreError> {
        let mut inserted = 0usize;
        for record in records {
            if map.contains_key(&record.id) {
                return Err(StoreError::DuplicateId(record.id));
            }
            map.insert(record.id.clone(), record);
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Full rewrite of the persisted state, via temp file + atomic rename so
    /// a crash mid-save leaves the previous state intact. Pretty-printed,
    /// non-ASCII text unescaped.
    pub async fn save(&self, map: &JobMap) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(map).map_err(StoreError::Encode)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.json".to_string());
        let temp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        let write_err = |source: std::io::Error| StoreError::Write {
            path: temp_path.clone(),
            source,
        };
        let mut file = fs::File::create(&temp_path).await.map_err(&write_err)?;
        file.write_all(&bytes).await.map_err(&write_err)?;
        file.flush().await.map_err(&write_err)?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Blocking-style fetch capability: one attempt per call, no retries. Upstream
/// sources block aggressive clients, so pacing is the caller's contract
/// (adapters observe a politeness delay between successive calls).
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET the url (with query params) and return the body as text. Non-2xx
    /// statuses are fetch failures.
    pub async fn fetch_text(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        let _guard = span.enter();

        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }
}
