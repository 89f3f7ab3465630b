//! Content-addressed artifact store: index + LRU eviction + TTL expiry.
//!
//! Writes land in a staging directory first and are committed with a single
//! rename, so a crash mid-write never leaves a partial entry visible under
//! its final key.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Failure modes specific to `CacheStore::put`, distinguished so callers can
/// reject an oversized entry outright rather than treating it as an I/O
/// failure.
#[derive(Debug, Error)]
pub enum PutError {
    #[error("entry size {size} exceeds max_cache_size {max}")]
    TooLarge { size: u64, max: u64 },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub relative_path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone)]
struct EntryMeta {
    size_bytes: u64,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Index {
    entries: HashMap<String, EntryMeta>,
    total_size_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct CacheStore {
    root: PathBuf,
    max_size_bytes: u64,
    default_ttl: Duration,
    high_water_fraction: f64,
    index: Mutex<Index>,
}

impl CacheStore {
    /// Open the store, rebuilding the in-memory index from whatever entries
    /// already exist on disk (so a restart doesn't forget the cache).
    pub fn open(
        root: PathBuf,
        max_size_bytes: u64,
        default_ttl: Duration,
        high_water_fraction: f64,
    ) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cache root {}", root.display()))?;
        fs::create_dir_all(root.join("staging"))?;

        let mut entries = HashMap::new();
        let mut total_size_bytes = 0u64;
        if let Ok(read_dir) = fs::read_dir(root.join("entries")) {
            for entry in read_dir.flatten() {
                let fingerprint = entry.file_name().to_string_lossy().to_string();
                if let Ok(meta) = Self::load_meta(&entry.path()) {
                    total_size_bytes += meta.size_bytes;
                    entries.insert(fingerprint, meta);
                }
            }
        }

        info!(count = entries.len(), total_size_bytes, "cache index loaded");

        Ok(Self {
            root,
            max_size_bytes,
            default_ttl,
            high_water_fraction,
            index: Mutex::new(Index {
                entries,
                total_size_bytes,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    fn entry_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join("entries").join(fingerprint)
    }

    fn meta_path(dir: &Path) -> PathBuf {
        dir.join("meta.json")
    }

    fn load_meta(dir: &Path) -> Result<EntryMeta> {
        let raw = fs::read_to_string(Self::meta_path(dir))?;
        let stored: StoredMeta = serde_json::from_str(&raw)?;
        Ok(EntryMeta {
            size_bytes: stored.size_bytes,
            created_at: stored.created_at,
            last_accessed_at: stored.last_accessed_at,
            expires_at: stored.expires_at,
        })
    }

    /// Fetch a cache entry, touching its last-accessed time. Returns `None`
    /// on a miss or if the entry has expired (expired entries are evicted
    /// lazily here rather than by a background sweep).
    pub fn get(&self, fingerprint: &str) -> Result<Option<Vec<Artifact>>> {
        let now = Utc::now();
        let expired = {
            let mut index = self.index.lock().unwrap();
            match index.entries.get(fingerprint) {
                None => {
                    index.misses += 1;
                    return Ok(None);
                }
                Some(meta) if meta.expires_at.is_some_and(|exp| exp <= now) => true,
                Some(_) => false,
            }
        };

        if expired {
            self.remove(fingerprint)?;
            let mut index = self.index.lock().unwrap();
            index.misses += 1;
            return Ok(None);
        }

        let dir = self.entry_dir(fingerprint);
        let artifacts = self.read_artifacts(&dir)?;

        {
            let mut index = self.index.lock().unwrap();
            index.hits += 1;
            if let Some(meta) = index.entries.get_mut(fingerprint) {
                meta.last_accessed_at = now;
            }
        }

        Ok(Some(artifacts))
    }

    fn read_artifacts(&self, dir: &Path) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let files_dir = dir.join("files");
        if !files_dir.exists() {
            return Ok(artifacts);
        }
        for entry in walkdir::WalkDir::new(&files_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative_path = entry
                .path()
                .strip_prefix(&files_dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let contents = fs::read(entry.path())?;
            artifacts.push(Artifact {
                relative_path,
                contents,
            });
        }
        Ok(artifacts)
    }

    /// Stage artifacts under a temp directory, then commit with a single
    /// rename so concurrent readers never observe a half-written entry.
    pub fn put(
        &self,
        fingerprint: &str,
        artifacts: &[Artifact],
        ttl: Option<Duration>,
    ) -> std::result::Result<(), PutError> {
        let requested_size: u64 = artifacts.iter().map(|a| a.contents.len() as u64).sum();
        if requested_size > self.max_size_bytes {
            return Err(PutError::TooLarge {
                size: requested_size,
                max: self.max_size_bytes,
            });
        }

        self.put_inner(fingerprint, artifacts, ttl)
            .map_err(PutError::Io)
    }

    fn put_inner(
        &self,
        fingerprint: &str,
        artifacts: &[Artifact],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let staging_dir = self.root.join("staging").join(format!(
            "{}-{}",
            fingerprint,
            std::process::id()
        ));
        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir)?;
        }
        let files_dir = staging_dir.join("files");
        fs::create_dir_all(&files_dir)?;

        let mut size_bytes = 0u64;
        for artifact in artifacts {
            let dest = files_dir.join(&artifact.relative_path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &artifact.contents)?;
            size_bytes += artifact.contents.len() as u64;
        }

        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = chrono::Duration::from_std(ttl).ok().map(|d| now + d);
        let stored = StoredMeta {
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            expires_at,
        };
        fs::write(
            Self::meta_path(&staging_dir),
            serde_json::to_vec_pretty(&stored)?,
        )?;

        let final_dir = self.entry_dir(fingerprint);
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&staging_dir, &final_dir).with_context(|| {
            format!(
                "failed to commit cache entry {} -> {}",
                staging_dir.display(),
                final_dir.display()
            )
        })?;

        {
            let mut index = self.index.lock().unwrap();
            if let Some(old) = index.entries.remove(fingerprint) {
                index.total_size_bytes = index.total_size_bytes.saturating_sub(old.size_bytes);
            }
            index.total_size_bytes += size_bytes;
            index.entries.insert(
                fingerprint.to_string(),
                EntryMeta {
                    size_bytes,
                    created_at: now,
                    last_accessed_at: now,
                    expires_at,
                },
            );
        }

        self.evict_if_over_high_water()?;
        Ok(())
    }

    pub fn remove(&self, fingerprint: &str) -> Result<bool> {
        let dir = self.entry_dir(fingerprint);
        let removed_meta = {
            let mut index = self.index.lock().unwrap();
            index.entries.remove(fingerprint)
        };
        let Some(meta) = removed_meta else {
            return Ok(false);
        };
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove cache entry dir {}", dir.display()))?;
        }
        let mut index = self.index.lock().unwrap();
        index.total_size_bytes = index.total_size_bytes.saturating_sub(meta.size_bytes);
        Ok(true)
    }

    /// Evict least-recently-used entries until the store is back under the
    /// configured high-water fraction of its capacity.
    fn evict_if_over_high_water(&self) -> Result<()> {
        let high_water = (self.max_size_bytes as f64 * self.high_water_fraction) as u64;

        loop {
            let victim = {
                let index = self.index.lock().unwrap();
                if index.total_size_bytes <= high_water {
                    return Ok(());
                }
                index
                    .entries
                    .iter()
                    .min_by_key(|(_, meta)| meta.last_accessed_at)
                    .map(|(fingerprint, _)| fingerprint.clone())
            };

            let Some(fingerprint) = victim else {
                return Ok(());
            };

            warn!(fingerprint = %fingerprint, "evicting cache entry to stay under high water mark");
            self.remove(&fingerprint)?;
            let mut index = self.index.lock().unwrap();
            index.evictions += 1;
        }
    }

    pub fn stats(&self) -> Stats {
        let index = self.index.lock().unwrap();
        Stats {
            entry_count: index.entries.len(),
            total_size_bytes: index.total_size_bytes,
            hits: index.hits,
            misses: index.misses,
            evictions: index.evictions,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn entry_timestamps(&self, fingerprint: &str) -> Option<(DateTime<Utc>, DateTime<Utc>, Option<DateTime<Utc>>)> {
        let index = self.index.lock().unwrap();
        index
            .entries
            .get(fingerprint)
            .map(|meta| (meta.created_at, meta.last_accessed_at, meta.expires_at))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredMeta {
    size_bytes: u64,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifact(path: &str, contents: &[u8]) -> Artifact {
        Artifact {
            relative_path: path.to_string(),
            contents: contents.to_vec(),
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let store = CacheStore::open(
            dir.path().to_path_buf(),
            1024 * 1024,
            Duration::from_secs(3600),
            0.9,
        )
        .unwrap();

        store
            .put("fp1", &[artifact("bin/out", b"hello")], None)
            .unwrap();

        let fetched = store.get("fp1").unwrap().unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].contents, b"hello");
    }

    #[test]
    fn miss_on_unknown_fingerprint() {
        let dir = tempdir().unwrap();
        let store = CacheStore::open(
            dir.path().to_path_buf(),
            1024 * 1024,
            Duration::from_secs(3600),
            0.9,
        )
        .unwrap();
        assert!(store.get("nope").unwrap().is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let dir = tempdir().unwrap();
        let store = CacheStore::open(
            dir.path().to_path_buf(),
            1024 * 1024,
            Duration::from_secs(3600),
            0.9,
        )
        .unwrap();
        store
            .put("fp1", &[artifact("a", b"x")], Some(Duration::from_secs(0)))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(store.get("fp1").unwrap().is_none());
    }

    #[test]
    fn eviction_keeps_store_under_high_water() {
        let dir = tempdir().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), 30, Duration::from_secs(3600), 0.5)
            .unwrap();

        store.put("fp1", &[artifact("a", &[0u8; 10])], None).unwrap();
        store.put("fp2", &[artifact("a", &[0u8; 10])], None).unwrap();
        store.put("fp3", &[artifact("a", &[0u8; 10])], None).unwrap();

        let stats = store.stats();
        assert!(stats.total_size_bytes <= 30);
        assert!(stats.evictions >= 1);
    }

    #[test]
    fn put_larger_than_max_cache_size_is_rejected() {
        let dir = tempdir().unwrap();
        let store = CacheStore::open(dir.path().to_path_buf(), 10, Duration::from_secs(3600), 0.9)
            .unwrap();

        let err = store
            .put("fp1", &[artifact("a", &[0u8; 20])], None)
            .unwrap_err();
        assert!(matches!(err, PutError::TooLarge { size: 20, max: 10 }));
        assert_eq!(store.stats().entry_count, 0);
        assert!(store.get("fp1").unwrap().is_none());
    }
}
