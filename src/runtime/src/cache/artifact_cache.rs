//! Content-addressed cache for fetched registry artifacts.
//!
//! Entries are keyed by digest (`sha256:...`) or by a fully-qualified
//! reference string. Once a key holds content it keeps that content for the
//! lifetime of the cache; later writes under the same key are ignored.
//!
//! Concurrent misses for the same key are collapsed: the first caller runs
//! the fetch, everyone else waits for and adopts its result.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use canopy_core::error::{CanopyError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

/// Shared, immutable cached content.
pub type Blob = Arc<Vec<u8>>;

/// Metadata written next to a persisted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Cache key (digest or reference)
    pub key: String,
    /// Size of the content in bytes
    pub size_bytes: u64,
    /// When this entry was cached (Unix timestamp)
    pub cached_at: i64,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Process-wide artifact cache shared by all registry backends.
pub struct ArtifactCache {
    entries: DashMap<String, Arc<OnceCell<Blob>>>,
    /// Optional directory entries are persisted to (e.g. ~/.cache/canopy)
    cache_dir: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ArtifactCache {
    /// Create a cache that only lives in memory.
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            cache_dir: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a cache that also persists entries under `cache_dir`.
    pub fn persistent(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            CanopyError::CacheError(format!(
                "Failed to create artifact cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            cache_dir: Some(cache_dir.to_path_buf()),
            ..Self::in_memory()
        })
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Get cached content without fetching.
    pub fn get(&self, key: &str) -> Option<Blob> {
        let blob = self.entries.get(key).and_then(|cell| cell.get().cloned());
        if blob.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        blob
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Return the content under `key`, running `fetch` at most once across
    /// all concurrent callers when the key is missing.
    ///
    /// A failed or cancelled fetch leaves the key empty.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Blob>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let cell = self.cell(key);
        let ran = AtomicBool::new(false);
        let ran_ref = &ran;

        let result = cell
            .get_or_try_init(|| async move {
                ran_ref.store(true, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);

                if let Some(data) = self.read_persisted(key) {
                    tracing::debug!(key = %key, "Loaded artifact from disk cache");
                    return Ok(Arc::new(data));
                }

                let data = fetch().await?;
                verify_digest(key, &data)?;
                self.persist(key, &data)?;
                tracing::debug!(key = %key, size_bytes = data.len(), "Cached artifact");
                Ok::<Blob, CanopyError>(Arc::new(data))
            })
            .await
            .cloned();
        let blob = match result {
            Ok(blob) => blob,
            Err(e) => {
                self.forget_failed(key, &cell);
                return Err(e);
            }
        };

        if !ran.load(Ordering::Relaxed) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(blob)
    }

    /// Insert content unless the key already holds some.
    ///
    /// Returns the content that ends up cached under `key`, which is the
    /// earlier content when the key was already populated, in memory or on
    /// disk.
    pub async fn insert(&self, key: &str, data: Vec<u8>) -> Result<Blob> {
        let cell = self.cell(key);
        let result = cell
            .get_or_try_init(|| async move {
                if let Some(existing) = self.read_persisted(key) {
                    return Ok(Arc::new(existing));
                }
                verify_digest(key, &data)?;
                self.persist(key, &data)?;
                Ok::<Blob, CanopyError>(Arc::new(data))
            })
            .await
            .cloned();
        if result.is_err() {
            self.forget_failed(key, &cell);
        }
        result
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.value().initialized())
                .count(),
        }
    }

    /// Total size of the content held in memory.
    pub fn total_size(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|entry| entry.value().get().map(|b| b.len() as u64))
            .sum()
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<Blob>> {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop the empty cell a failed attempt left behind, unless another
    /// caller is still waiting on it and will retry.
    fn forget_failed(&self, key: &str, cell: &Arc<OnceCell<Blob>>) {
        self.entries.remove_if(key, |_, current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(current) <= 2
        });
    }

    /// Read a persisted entry. Unreadable or corrupt entries count as misses.
    fn read_persisted(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key)?;
        if !path.is_file() {
            return None;
        }
        match std::fs::read(&path) {
            Ok(data) => match verify_digest(key, &data) {
                Ok(()) => Some(data),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Ignoring corrupt cache entry");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    path = %path.display(),
                    error = %e,
                    "Failed to read cache entry"
                );
                None
            }
        }
    }

    /// Write an entry to disk (write tmp, rename).
    ///
    /// Only called after `read_persisted` found nothing usable, so a file
    /// already at `path` is corrupt and gets replaced.
    fn persist(&self, key: &str, data: &[u8]) -> Result<()> {
        let (Some(path), Some(meta_path)) = (self.entry_path(key), self.meta_path(key)) else {
            return Ok(());
        };

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, data).map_err(|e| {
            CanopyError::CacheError(format!(
                "Failed to write cache entry {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            CanopyError::CacheError(format!(
                "Failed to rename cache entry {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        let meta = ArtifactMeta {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            cached_at: chrono::Utc::now().timestamp(),
        };
        std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?).map_err(|e| {
            CanopyError::CacheError(format!(
                "Failed to write cache metadata {}: {}",
                meta_path.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(Self::key_to_filename(key)))
    }

    fn meta_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.meta.json", Self::key_to_filename(key))))
    }

    /// Keys contain `/` and `:`, so files are named by the key's sha256.
    fn key_to_filename(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Check that content stored under a `sha256:` key matches the digest.
fn verify_digest(key: &str, data: &[u8]) -> Result<()> {
    if !digest_matches(key, data) {
        return Err(CanopyError::Malformed {
            reference: key.to_string(),
            message: format!("digest mismatch: content hashes to {}", sha256_digest(data)),
        });
    }
    Ok(())
}

/// Whether `data` hashes to `digest`. Hex case is ignored; digests in
/// other algorithms are not checked and always match.
pub fn digest_matches(digest: &str, data: &[u8]) -> bool {
    match digest.strip_prefix("sha256:") {
        Some(expected) => hex::encode(Sha256::digest(data)).eq_ignore_ascii_case(expected),
        None => true,
    }
}

/// `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}
