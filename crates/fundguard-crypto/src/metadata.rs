//! Keyed storage for sealed payloads.
//!
//! The vault only produces [`EncryptedPayload`]s; where they live is a
//! deployment decision. Three stores are provided:
//!
//! - [`InMemoryMetadataStore`]: sharded map, durable for the process lifetime
//! - [`FileMetadataStore`]: one JSON file per blob, written atomically
//! - [`ExpiringMetadataStore`]: in-memory with a fixed time-to-live
//!
//! Entries written to an expiring store become unreadable once the TTL
//! passes, even though the document they describe still exists. Use it only
//! when that retention is actually intended.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fundguard_types::{Clock, SystemClock};
use sha2::{Digest, Sha256};

use crate::{EncryptedPayload, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed store mapping a blob's storage id to its sealed payload.
///
/// Implementations must allow concurrent reads and writes on different keys
/// without serializing on a global lock.
pub trait MetadataStore: Send + Sync + Debug {
    fn store_metadata(&self, blob_id: &str, payload: &EncryptedPayload) -> Result<()>;

    /// `Ok(None)` means the entry is absent (never written, expired, or
    /// evicted). Callers must not treat that as "document not found".
    fn retrieve_metadata(&self, blob_id: &str) -> Result<Option<EncryptedPayload>>;
}

fn validate_blob_id(blob_id: &str) -> Result<()> {
    if blob_id.trim().is_empty() {
        return Err(StoreError::InvalidBlobId(blob_id.to_string()));
    }
    Ok(())
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    entries: DashMap<String, EncryptedPayload>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn store_metadata(&self, blob_id: &str, payload: &EncryptedPayload) -> Result<()> {
        validate_blob_id(blob_id)?;
        self.entries.insert(blob_id.to_string(), payload.clone());
        Ok(())
    }

    fn retrieve_metadata(&self, blob_id: &str) -> Result<Option<EncryptedPayload>> {
        validate_blob_id(blob_id)?;
        Ok(self.entries.get(blob_id).map(|entry| entry.value().clone()))
    }
}

// ============================================================================
// File-backed
// ============================================================================

/// One JSON file per blob under a directory.
///
/// File names are the SHA-256 of the blob id so arbitrary storage keys never
/// escape the directory. Writes go to a unique temp file and are renamed into
/// place, so a reader never sees a half-written payload and concurrent writers
/// on one key resolve last-write-wins.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, blob_id: &str) -> PathBuf {
        let digest = Sha256::digest(blob_id.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

impl MetadataStore for FileMetadataStore {
    fn store_metadata(&self, blob_id: &str, payload: &EncryptedPayload) -> Result<()> {
        validate_blob_id(blob_id)?;

        let path = self.path_for(blob_id);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let json = serde_json::to_vec(payload)?;

        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            StoreError::Io {
                path: path.clone(),
                source,
            }
        })?;

        tracing::trace!(blob_id, path = %path.display(), "stored encryption metadata");
        Ok(())
    }

    fn retrieve_metadata(&self, blob_id: &str) -> Result<Option<EncryptedPayload>> {
        validate_blob_id(blob_id)?;

        let path = self.path_for(blob_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

// ============================================================================
// Expiring
// ============================================================================

/// In-memory store whose entries vanish after a fixed TTL.
///
/// Writes sweep expired entries at most once per TTL, so memory stays
/// bounded by what was written in the last two TTLs.
#[derive(Debug)]
pub struct ExpiringMetadataStore {
    entries: DashMap<String, (EncryptedPayload, DateTime<Utc>)>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    /// Unix millis of the next sweep.
    next_sweep: AtomicI64,
}

impl ExpiringMetadataStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let next_sweep = AtomicI64::new((clock.now() + ttl).timestamp_millis());
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            next_sweep,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries held, including expired ones not swept yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_at(self.clock.now())
    }

    fn purge_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn sweep_if_due(&self, now: DateTime<Utc>) {
        let due = self.next_sweep.load(Ordering::Relaxed);
        if now.timestamp_millis() < due {
            return;
        }
        let next = (now + self.ttl).timestamp_millis();
        // One writer wins the sweep; the others skip it.
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.purge_at(now);
            if removed > 0 {
                tracing::debug!(removed, "expired encryption metadata swept");
            }
        }
    }
}

impl MetadataStore for ExpiringMetadataStore {
    fn store_metadata(&self, blob_id: &str, payload: &EncryptedPayload) -> Result<()> {
        validate_blob_id(blob_id)?;
        let now = self.clock.now();
        self.sweep_if_due(now);
        let expires_at = now + self.ttl;
        self.entries
            .insert(blob_id.to_string(), (payload.clone(), expires_at));
        Ok(())
    }

    fn retrieve_metadata(&self, blob_id: &str) -> Result<Option<EncryptedPayload>> {
        validate_blob_id(blob_id)?;
        let now = self.clock.now();

        match self.entries.get(blob_id) {
            None => return Ok(None),
            Some(entry) => {
                let (payload, expires_at) = entry.value();
                if *expires_at > now {
                    return Ok(Some(payload.clone()));
                }
            }
        }

        self.entries
            .remove_if(blob_id, |_, (_, expires_at)| *expires_at <= now);
        tracing::debug!(blob_id, "encryption metadata expired");
        Ok(None)
    }
}
