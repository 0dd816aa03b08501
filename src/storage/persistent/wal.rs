//! Write-ahead log of graph mutations.
//!
//! Every state-changing [`GraphMutation`] is appended (and optionally
//! fsynced) before it is applied in memory. On open the log is replayed;
//! a torn or corrupted tail stops replay at the last intact entry and is
//! cut off so later appends land after valid data.
//!
//! A failed append is rolled back to the end of the last intact entry, so
//! a mutation reported as failed never reaches the log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::frame;
use crate::storage::mutation::GraphMutation;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    pub mutation: GraphMutation,
}

struct WalWriter {
    file: File,
    sequence: u64,
    /// Length of the log up to the end of the last intact entry.
    valid_len: u64,
}

impl WalWriter {
    fn write_frame(&mut self, bytes: &[u8], sync: bool) -> IoResult<()> {
        self.file.write_all(bytes)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut off whatever a failed append left behind.
    fn discard_partial(&mut self, path: &Path) {
        if let Err(e) = self.file.set_len(self.valid_len) {
            warn!(
                path = %path.display(),
                valid_len = self.valid_len,
                error = %e,
                "failed to roll back partial write-ahead log entry"
            );
        }
    }
}

/// Append-only mutation log.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

fn create_fresh(path: &Path, sync: bool) -> IoResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    frame::write_header(&mut file)?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

/// Read every intact entry and the byte offset where intact data ends.
fn read_entries(path: &Path) -> IoResult<(Vec<WalEntry>, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    frame::read_header(&mut reader)?;

    let mut entries = Vec::new();
    loop {
        let offset = reader.stream_position()?;
        match frame::decode_frame::<WalEntry>(&mut reader) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => return Ok((entries, offset)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    offset,
                    after_sequence = entries.last().map_or(0, |last| last.sequence),
                    error = %e,
                    "discarding corrupted write-ahead log tail"
                );
                return Ok((entries, offset));
            }
        }
    }
}

impl WriteAheadLog {
    /// Open or create the log at `path`, returning it with the entries to
    /// replay.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let has_header = fs::metadata(path).map(|m| m.len() >= frame::HEADER_LEN).unwrap_or(false);
        if !has_header {
            create_fresh(path, sync_on_write)?;
        }

        let (entries, valid_len) = read_entries(path)?;
        if valid_len < fs::metadata(path)?.len() {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            if sync_on_write {
                file.sync_all()?;
            }
        }

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;
        let wal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file,
                sequence,
                valid_len,
            }),
            sync_on_write,
        };
        Ok((wal, entries))
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Append a mutation. Returns the sequence number assigned to it.
    pub fn append(&self, mutation: &GraphMutation) -> IoResult<u64> {
        let mut writer = self.lock()?;
        let entry = WalEntry {
            sequence: writer.sequence + 1,
            timestamp: Utc::now(),
            mutation: mutation.clone(),
        };
        let bytes = frame::encode_frame(&entry)?;

        if let Err(e) = writer.write_frame(&bytes, self.sync_on_write) {
            writer.discard_partial(&self.path);
            return Err(e);
        }
        writer.valid_len += bytes.len() as u64;
        writer.sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Atomically replace the log with `mutations`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&self, mutations: Vec<GraphMutation>) -> IoResult<u64> {
        let mut writer = self.lock()?;

        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = BufWriter::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp)?,
            );
            frame::write_header(&mut out)?;
            let now = Utc::now();
            for (i, mutation) in mutations.into_iter().enumerate() {
                let entry = WalEntry {
                    sequence: i as u64 + 1,
                    timestamp: now,
                    mutation,
                };
                out.write_all(&frame::encode_frame(&entry)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let (entries, valid_len) = read_entries(&self.path)?;
        writer.sequence = entries.last().map_or(0, |e| e.sequence);
        writer.valid_len = valid_len;
        writer.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(writer.sequence)
    }

    /// The last assigned sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// The log file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}
