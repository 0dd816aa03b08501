//! Persistent storage backend for taxocat.
//!
//! The graph lives in memory; durability comes from a write-ahead log of
//! [`GraphMutation`]s:
//! - every state-changing mutation is logged before it is applied
//! - CRC32 checksums detect corruption; a torn tail is discarded on open
//! - [`PersistentGraphStore::compact`] rewrites the log as a snapshot
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   graph.wal     header + checksummed mutation frames
//! ```

mod frame;
mod wal;

pub use wal::{WalEntry, WriteAheadLog};

use std::fs;
use std::path::Path;
use std::sync::RwLock;

use tracing::info;

use crate::error::{CatalogError, CatalogResult, ExecutionError, ValidationError};
use crate::storage::mutation::{GraphMutation, GraphState};
use crate::storage::traits::StorageError;

const WAL_FILE: &str = "graph.wal";

/// Configuration for persistent storage.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// Log size that triggers compaction on open (bytes).
    pub max_wal_size: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_wal_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Reject configurations that would compact on every open.
    pub fn validate(self) -> CatalogResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            }
            .into());
        }
        Ok(self)
    }
}

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CompactionResult {
    /// Entries in the rewritten log.
    pub entries_written: u64,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

fn storage_err(message: String) -> CatalogError {
    ExecutionError::StoreUnavailable {
        message,
        operations_completed: 0,
    }
    .into()
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Durable property graph backed by a write-ahead log.
#[derive(Debug)]
pub struct PersistentGraphStore {
    state: RwLock<GraphState>,
    wal: WriteAheadLog,
}

impl PersistentGraphStore {
    /// Open or create a store in `dir`, replaying its log.
    pub fn open(dir: &Path, config: PersistentConfig) -> CatalogResult<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| storage_err(format!("failed to create database directory: {e}")))?;

        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| storage_err(format!("failed to open write-ahead log: {e}")))?;

        let mut state = GraphState::default();
        let replayed = entries.len();
        for entry in entries {
            // Replay is lenient: an entry that no longer applies was a no-op
            // when the state it was logged against is rebuilt.
            if state.precheck(&entry.mutation).unwrap_or(false) {
                state.apply(entry.mutation);
            }
        }
        if replayed > 0 {
            info!(dir = %dir.display(), replayed, "replayed write-ahead log");
        }

        let store = Self {
            state: RwLock::new(state),
            wal,
        };

        if store.wal_size() > config.max_wal_size {
            store.compact()?;
        }
        Ok(store)
    }

    fn mutate(&self, mutation: GraphMutation, context: &'static str) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        if !state.precheck(&mutation)? {
            return Ok(0);
        }
        self.wal
            .append(&mutation)
            .map_err(|e| StorageError::BackendError(format!("WAL write failed ({context}): {e}")))?;
        Ok(state.apply(mutation))
    }

    fn read<T>(&self, context: &'static str, f: impl FnOnce(&GraphState) -> T) -> Result<T, StorageError> {
        let state = self.state.read().map_err(|_| lock_err(context))?;
        Ok(f(&state))
    }

    /// Rewrite the log as the minimal set of mutations rebuilding the
    /// current state.
    ///
    /// Safe to call at any time: the new log replaces the old one by an
    /// atomic rename.
    pub fn compact(&self) -> CatalogResult<CompactionResult> {
        let state = self
            .state
            .read()
            .map_err(|_| CatalogError::internal("poisoned lock: compact"))?;
        let wal_size_before = self.wal_size();
        let entries_written = self
            .wal
            .rewrite(state.snapshot_mutations())
            .map_err(|e| storage_err(format!("failed to rewrite write-ahead log: {e}")))?;
        let wal_size_after = self.wal_size();
        info!(entries_written, wal_size_before, wal_size_after, "compacted write-ahead log");
        Ok(CompactionResult {
            entries_written,
            wal_size_before,
            wal_size_after,
        })
    }

    /// Get the current log size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }
}

impl_graph_store!(PersistentGraphStore);

/// Open or create a persistent graph at the given directory.
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use taxocat::storage::open_graph;
///
/// let store = open_graph("./catalog.taxo", None)?;
/// let engine = CatalogEngine::new(Arc::new(store), EngineConfig::default())?;
/// ```
pub fn open_graph(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> CatalogResult<PersistentGraphStore> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentGraphStore::open(path.as_ref(), cfg)
}
