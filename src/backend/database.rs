//! Embedded document database: named collections of schemaless records.
//!
//! Provides exactly the backend capabilities the store needs: collections
//! created on demand, monotonic id assignment on insert, acknowledged
//! single-record update, and the aggregation pipeline. A database is
//! either purely in-memory or backed by a directory holding a manifest,
//! a lock file, and one snapshot file with all collections.

use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::collection::Collection;
use crate::error::{Result, StoreError};
use crate::types::Fields;

/// Magic bytes for the database manifest.
const DB_MAGIC: &[u8; 4] = b"SDB\0";

/// Magic bytes for the collections snapshot file.
const SNAPSHOT_MAGIC: &[u8; 4] = b"SBC\0";

/// Current on-disk format version.
const DB_VERSION: u8 = 1;

/// Database configuration.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Base directory for the database.
    pub path: PathBuf,

    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./db"),
            create_if_missing: true,
        }
    }
}

/// Records of one collection plus its id counter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct CollectionData {
    /// Records by id. Iteration order is id order, i.e. insertion order.
    pub(crate) records: std::collections::BTreeMap<u64, Fields>,

    /// Next id to assign. Never reused, even after a clear.
    pub(crate) next_id: u64,
}

impl CollectionData {
    pub(crate) fn new() -> Self {
        Self { records: Default::default(), next_id: 1 }
    }
}

pub(crate) struct DatabaseInner {
    /// All collections by name.
    pub(crate) collections: RwLock<HashMap<String, CollectionData>>,

    /// Base directory, if file-backed.
    path: Option<PathBuf>,

    /// Lock file for exclusive access (file-backed only).
    _lock_file: Option<File>,
}

/// Handle to a document database. Cheap to clone; all clones share the
/// same collections.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create a purely in-memory database. `sync` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                collections: RwLock::new(HashMap::new()),
                path: None,
                _lock_file: None,
            }),
        }
    }

    /// Open an existing database or create a new one.
    pub fn open_or_create(config: DatabaseConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new file-backed database.
    pub fn create(config: DatabaseConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        tracing::debug!(path = %config.path.display(), "created database");

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                collections: RwLock::new(HashMap::new()),
                path: Some(config.path),
                _lock_file: Some(lock_file),
            }),
        })
    }

    /// Open an existing file-backed database.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let snapshot = config.path.join("collections.bin");
        let collections = if snapshot.exists() {
            Self::load_snapshot(&snapshot)?
        } else {
            HashMap::new()
        };

        tracing::debug!(
            path = %config.path.display(),
            collections = collections.len(),
            "opened database"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                collections: RwLock::new(collections),
                path: Some(config.path),
                _lock_file: Some(lock_file),
            }),
        })
    }

    /// Handle to a named collection, created on demand.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        let name = name.into();
        self.inner
            .collections
            .write()
            .entry(name.clone())
            .or_insert_with(CollectionData::new);
        Collection::new(name, Arc::clone(&self.inner))
    }

    /// Persist all collections to disk. No-op for in-memory databases.
    pub fn sync(&self) -> Result<()> {
        let path = match &self.inner.path {
            Some(p) => p,
            None => return Ok(()),
        };
        write_snapshot(path, &self.inner.collections.read())
    }

    fn load_snapshot(path: &Path) -> Result<HashMap<String, CollectionData>> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(StoreError::InvalidFormat("invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != DB_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)?;

        let got = crc32fast::hash(&payload);
        if got != expected {
            return Err(StoreError::Corruption(format!(
                "snapshot checksum mismatch: expected {expected:08x}, got {got:08x}"
            )));
        }

        Ok(rmp_serde::from_slice(&payload)?)
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(DB_MAGIC)?;
        file.write_all(&[DB_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != DB_MAGIC {
            return Err(StoreError::InvalidFormat("invalid database magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != DB_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported database version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }
}

/// Write all collections as one snapshot file: magic, version, CRC32 of
/// the payload, payload length, rmp-serde payload.
fn write_snapshot(path: &Path, collections: &HashMap<String, CollectionData>) -> Result<()> {
    let payload = rmp_serde::to_vec(collections)?;
    let checksum = crc32fast::hash(&payload);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path.join("collections.bin"))?;
    file.write_all(SNAPSHOT_MAGIC)?;
    file.write_all(&[DB_VERSION])?;
    file.write_all(&checksum.to_le_bytes())?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(&payload)?;
    file.sync_all()?;

    tracing::trace!(bytes = payload.len(), "wrote collections snapshot");
    Ok(())
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        // Best-effort sync on drop for file-backed databases.
        if let Some(path) = &self.path {
            let _ = write_snapshot(path, &self.collections.read());
        }
    }
}
