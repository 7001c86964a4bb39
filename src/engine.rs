//! Engine Module
//!
//! The bundled persistent engine: WAL + MemTable + SSTables behind the
//! `Backend` interface.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Handle concurrent read/write access
//! - Trigger flushes when MemTable is full
//! - Manage crash recovery on startup

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::backend::{copy_into, Backend, ReadStatus, RemoveStatus};
use crate::config::Config;
use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::StorageManager;
use crate::wal::{Operation, WalRecovery, WalWriter};

/// The persistent storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/flush/compact): serialized by `write_lock`,
///   then WAL → memtable → storage
/// - **Reads** (get/contains_key): no write lock; the memtable and the
///   SSTable list each use an internal RwLock
pub struct Engine {
    config: Config,

    /// Directory holding the SSTables
    storage_dir: PathBuf,

    wal: Mutex<WalWriter>,

    memtable: MemTable,

    storage: StorageManager,

    /// Serializes write operations
    write_lock: Mutex<()>,
}

/// Where a key currently resolves
enum Resolved {
    Value(Vec<u8>),
    Deleted,
    Unknown,
}

impl Engine {
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load existing SSTables
    /// 3. Replay the WAL and flush what it held into an SSTable
    /// 4. Truncate the WAL, now that its contents are durable
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        let storage = StorageManager::open(&storage_dir)?;
        let memtable = MemTable::new();

        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;

            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    "WAL recovery: {} entries recovered, {} corrupted, last_lsn={}",
                    recovery.entries_recovered,
                    recovery.entries_corrupted,
                    recovery.last_lsn
                );
            }

            for entry in entries {
                match entry.operation {
                    Operation::Put { key, value } => {
                        memtable.put(key, value);
                    }
                    Operation::Delete { key } => {
                        memtable.delete(key);
                    }
                }
            }

            if !memtable.is_empty() {
                tracing::info!("Flushing {} recovered entries to SSTable", memtable.entry_count());
                storage.flush(&memtable)?;
                memtable.clear();
            }
        }

        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        wal.truncate()?;

        tracing::debug!("Engine opened at {}", config.data_dir.display());

        Ok(Self {
            config,
            storage_dir,
            wal: Mutex::new(wal),
            memtable,
            storage,
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path, using the default config otherwise
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn resolve(&self, key: &[u8]) -> Result<Resolved> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(match entry {
                MemTableEntry::Value(value) => Resolved::Value(value),
                MemTableEntry::Tombstone => Resolved::Deleted,
            });
        }
        Ok(match self.storage.get(key)? {
            Some(value) => Resolved::Value(value),
            None => Resolved::Unknown,
        })
    }

    /// Get a value by key: MemTable first, then SSTables newest → oldest
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(match self.resolve(key)? {
            Resolved::Value(value) => Some(value),
            Resolved::Deleted | Resolved::Unknown => None,
        })
    }

    /// Whether a live value exists for `key`
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(matches!(self.resolve(key)?, Resolved::Value(_)))
    }

    /// Put a key-value pair: WAL, then MemTable, then flush if full
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        self.wal.lock().append(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;

        let new_size = self.memtable.put(key.to_vec(), value.to_vec());
        if new_size >= self.config.memtable_size_limit {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Delete a key. Absent keys write nothing and report `NotFound`.
    pub fn delete(&self, key: &[u8]) -> Result<RemoveStatus> {
        let _write_guard = self.write_lock.lock();

        if !self.contains_key(key)? {
            return Ok(RemoveStatus::NotFound);
        }

        self.wal.lock().append(Operation::Delete { key: key.to_vec() })?;

        let new_size = self.memtable.delete(key.to_vec());
        if new_size >= self.config.memtable_size_limit {
            self.flush_internal()?;
        }

        Ok(RemoveStatus::Removed)
    }

    /// Force a MemTable flush regardless of its size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Called with the write lock held
    fn flush_internal(&self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.storage.flush(&self.memtable)?;
        self.memtable.clear();
        // Entries are durable in the SSTable now
        self.wal.lock().truncate()?;

        Ok(())
    }

    /// Flush, then merge all SSTables into one
    pub fn compact(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()?;
        self.storage.compact()?;
        Ok(())
    }

    /// Flush pending data and sync the WAL
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.wal.lock().sync()?;
        tracing::debug!("Engine closed at {}", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Backend for Engine {
    fn read(&self, key: &[u8], buf: &mut [u8]) -> Result<ReadStatus> {
        Ok(match self.get(key)? {
            Some(value) => copy_into(&value, buf),
            None => ReadStatus::NotFound,
        })
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<RemoveStatus> {
        self.delete(key)
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        self.contains_key(key)
    }
}
