//! Commit log and snapshot persistence for the local cache.
//!
//! Every committed change set is appended to a length-prefixed MessagePack
//! log. A checkpoint writes the full table set to a snapshot file (temp file
//! plus rename) and truncates the log. Recovery loads the snapshot and
//! replays any newer change sets on top of it.

use super::{StoreState, Table};
use crate::core::{MirrorError, Result};
use crate::schema::SchemaRegistry;
use crate::transaction::ChangeSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LOG_FILE: &str = "mirrordb.log";
pub const SNAPSHOT_FILE: &str = "mirrordb.snapshot";
pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 1000;
const SNAPSHOT_FORMAT: u32 = 1;

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// fsync after every commit.
    Sync,
    /// Flush to the OS after every commit.
    #[default]
    Async,
    /// Memory only.
    None,
}

/// Where committed change sets go.
pub trait DurabilityBackend: Send {
    fn append(&mut self, changes: &ChangeSet) -> Result<()>;

    /// Persist the full state and discard log entries it covers.
    fn checkpoint(&mut self, state: &StoreState) -> Result<()>;

    fn needs_checkpoint(&self) -> bool;

    /// Rebuild the last committed state.
    fn load(&self, registry: SchemaRegistry) -> Result<StoreState>;

    fn entries_since_checkpoint(&self) -> usize;
}

/// Backend for purely in-memory stores.
#[derive(Debug, Default)]
pub struct NoDurability;

impl DurabilityBackend for NoDurability {
    fn append(&mut self, _changes: &ChangeSet) -> Result<()> {
        Ok(())
    }

    fn checkpoint(&mut self, _state: &StoreState) -> Result<()> {
        Ok(())
    }

    fn needs_checkpoint(&self) -> bool {
        false
    }

    fn load(&self, registry: SchemaRegistry) -> Result<StoreState> {
        StoreState::new(registry)
    }

    fn entries_since_checkpoint(&self) -> usize {
        0
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub format: u32,
    pub version: u64,
    pub tables: HashMap<String, Table>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: i64,
    pub row_count: usize,
    pub table_count: usize,
}

impl StoreSnapshot {
    pub fn capture(state: &StoreState) -> Self {
        let tables = state.export_tables();
        let row_count = tables.values().map(Table::len).sum();
        let table_count = tables.len();
        Self {
            format: SNAPSHOT_FORMAT,
            version: state.version(),
            tables,
            metadata: SnapshotMetadata {
                created_at: chrono::Utc::now().timestamp_millis(),
                row_count,
                table_count,
            },
        }
    }
}

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.snapshot_path.with_extension("tmp");
        let serialized = rmp_serde::to_vec(snapshot).map_err(|e| {
            MirrorError::Serialization(format!("Failed to serialize snapshot: {}", e))
        })?;

        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(&serialized)?;
        writer.flush()?;
        writer.get_mut().sync_all()?;
        fs::rename(&temp_path, &self.snapshot_path).map_err(|e| {
            MirrorError::Persistence(format!("Failed to rename snapshot: {}", e))
        })?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut data = Vec::new();
        File::open(&self.snapshot_path)?.read_to_end(&mut data)?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data).map_err(|e| {
            MirrorError::Persistence(format!("Failed to deserialize snapshot: {}", e))
        })?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(MirrorError::Persistence(format!(
                "Unsupported snapshot format {}",
                snapshot.format
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Commit Log
// ============================================================================

pub struct CommitLog {
    path: PathBuf,
    file: BufWriter<File>,
    mode: DurabilityMode,
    entries_since_checkpoint: usize,
    /// Byte length of the complete entries on disk.
    valid_len: u64,
    /// A failed append may have left bytes past `valid_len`.
    tail_dirty: bool,
}

impl CommitLog {
    pub fn open<P: AsRef<Path>>(path: P, mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        // New entries must follow the last complete one.
        let (entries, valid_len) = Self::scan(&path)?;
        if file.metadata()?.len() > valid_len {
            warn!("Truncating torn entry at the end of {}", path.display());
            file.set_len(valid_len)?;
        }

        Ok(Self {
            path,
            file: BufWriter::new(file),
            mode,
            entries_since_checkpoint: entries.len(),
            valid_len,
            tail_dirty: false,
        })
    }

    /// Append one entry. On failure nothing of it survives in the log.
    pub fn append(&mut self, changes: &ChangeSet) -> Result<()> {
        if self.tail_dirty {
            self.discard_tail()?;
        }
        let serialized = rmp_serde::to_vec(changes).map_err(|e| {
            MirrorError::Serialization(format!("Failed to serialize log entry: {}", e))
        })?;
        let len = u32::try_from(serialized.len()).map_err(|_| {
            MirrorError::Persistence(format!("Log entry of {} bytes is too large", serialized.len()))
        })?;

        let mut entry = Vec::with_capacity(4 + serialized.len());
        entry.extend_from_slice(&len.to_le_bytes());
        entry.extend_from_slice(&serialized);

        if let Err(e) = self.write_entry(&entry) {
            warn!("Commit log append failed, dropping partial entry: {}", e);
            self.tail_dirty = true;
            if let Err(reset) = self.discard_tail() {
                warn!("Could not reset {}: {}", self.path.display(), reset);
            }
            return Err(e);
        }
        self.valid_len += entry.len() as u64;
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    fn write_entry(&mut self, entry: &[u8]) -> Result<()> {
        self.file.write_all(entry)?;
        self.file.flush()?;
        if self.mode == DurabilityMode::Sync {
            self.file.get_mut().sync_all()?;
        }
        Ok(())
    }

    /// Drop buffered and written bytes past the last complete entry.
    pub(crate) fn discard_tail(&mut self) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.file, BufWriter::new(file));
        // Unwritten bytes come back here instead of being flushed on drop.
        let (_, _unwritten) = stale.into_parts();
        self.file.get_ref().set_len(self.valid_len)?;
        self.tail_dirty = false;
        Ok(())
    }

    /// Every complete entry in the log. A torn trailing entry is ignored.
    pub fn read_all(&self) -> Result<Vec<ChangeSet>> {
        Ok(Self::scan(&self.path)?.0)
    }

    /// Complete entries plus the byte length they occupy.
    fn scan(path: &Path) -> Result<(Vec<ChangeSet>, u64)> {
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("Torn entry at the end of {}", path.display());
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            let entry: ChangeSet = rmp_serde::from_slice(&data).map_err(|e| {
                MirrorError::Persistence(format!("Failed to deserialize log entry: {}", e))
            })?;
            entries.push(entry);
            valid_len += 4 + len as u64;
        }
        Ok((entries, valid_len))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.file.flush()?;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file = BufWriter::new(file);
        self.entries_since_checkpoint = 0;
        self.valid_len = 0;
        self.tail_dirty = false;
        Ok(())
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }
}

// ============================================================================
// File Backend
// ============================================================================

pub struct FileDurability {
    log: CommitLog,
    snapshot: SnapshotManager,
    checkpoint_threshold: usize,
}

impl FileDurability {
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        mode: DurabilityMode,
        checkpoint_threshold: usize,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let log = CommitLog::open(data_dir.join(LOG_FILE), mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        info!("Opened durable cache at {}", data_dir.display());
        Ok(Self {
            log,
            snapshot,
            checkpoint_threshold,
        })
    }
}

impl DurabilityBackend for FileDurability {
    fn append(&mut self, changes: &ChangeSet) -> Result<()> {
        self.log.append(changes)
    }

    fn checkpoint(&mut self, state: &StoreState) -> Result<()> {
        let snapshot = StoreSnapshot::capture(state);
        debug!(
            "Checkpoint at version {} ({} rows)",
            snapshot.version, snapshot.metadata.row_count
        );
        self.snapshot.save(&snapshot)?;
        self.log.clear()
    }

    fn needs_checkpoint(&self) -> bool {
        self.checkpoint_threshold > 0 && self.log.entries_since_checkpoint() >= self.checkpoint_threshold
    }

    fn load(&self, registry: SchemaRegistry) -> Result<StoreState> {
        let mut state = match self.snapshot.load()? {
            Some(snapshot) => StoreState::from_tables(registry, snapshot.version, snapshot.tables)?,
            None => StoreState::new(registry)?,
        };

        let mut replayed = 0;
        for entry in self.log.read_all()? {
            if entry.version <= state.version() {
                continue;
            }
            for change in &entry.changes {
                state.replay(change)?;
            }
            state.set_version(entry.version);
            replayed += 1;
        }
        info!(
            "Recovered cache at version {} ({} log entries replayed)",
            state.version(),
            replayed
        );
        Ok(state)
    }

    fn entries_since_checkpoint(&self) -> usize {
        self.log.entries_since_checkpoint()
    }
}
