//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Buf;
use parking_lot::Mutex;

use crate::error::{Result, StashError};

use super::iterator::{ScannedEntry, SSTableIterator};
use super::{ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Result of looking a key up in one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Live value
    Value(Vec<u8>),
    /// Key was deleted as of this table
    Tombstone,
    /// Key does not appear in this table
    Absent,
}

/// Reader for SSTable files with in-memory index for O(log n) lookups
///
/// The file handle sits behind a mutex so lookups only need `&self`.
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    index_offset: u64,
}

fn corrupt(path: &Path, what: impl std::fmt::Display) -> StashError {
    StashError::Storage(format!("SSTable {}: {}", path.display(), what))
}

impl SSTableReader {
    /// Open an SSTable, load its index, and verify the data checksum
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(path, format!("file too small ({} bytes)", file_size)));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        let mut cursor = &header[..];
        if &cursor[..MAGIC.len()] != MAGIC {
            return Err(corrupt(path, format!("bad magic {:?}", &header[..4])));
        }
        cursor.advance(MAGIC.len());
        let version = cursor.get_u16_le();
        if version != VERSION {
            return Err(corrupt(path, format!("unsupported version {}", version)));
        }
        let entry_count = cursor.get_u64_le();

        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let mut cursor = &footer[..];
        let index_offset = cursor.get_u64_le();
        let data_crc = cursor.get_u32_le();

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(path, format!("index offset {} out of range", index_offset)));
        }

        // Data block checksum
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = index_offset - HEADER_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.read_exact(&mut chunk[..n])?;
            hasher.update(&chunk[..n]);
            remaining -= n as u64;
        }
        let actual_crc = hasher.finalize();
        if actual_crc != data_crc {
            return Err(corrupt(
                path,
                format!("data CRC mismatch: stored {:08x}, computed {:08x}", data_crc, actual_crc),
            ));
        }

        // Index block: [key_len(4)][offset(8)][key]
        let index_len = (file_size - FOOTER_SIZE - index_offset) as usize;
        let mut index_data = vec![0u8; index_len];
        file.read_exact(&mut index_data)?;

        let mut index = BTreeMap::new();
        let mut cursor = &index_data[..];
        while cursor.has_remaining() {
            if cursor.remaining() < 12 {
                return Err(corrupt(path, "truncated index record"));
            }
            let key_len = cursor.get_u32_le() as usize;
            let offset = cursor.get_u64_le();
            if cursor.remaining() < key_len {
                return Err(corrupt(path, "truncated index key"));
            }
            index.insert(cursor[..key_len].to_vec(), offset);
            cursor.advance(key_len);
        }

        if index.len() as u64 != entry_count {
            return Err(corrupt(
                path,
                format!("header counts {} entries, index holds {}", entry_count, index.len()),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
        })
    }

    /// Look a key up — O(log n) via the in-memory index, one seek on a hit
    pub fn get(&self, key: &[u8]) -> Result<Lookup> {
        let offset = match self.index.get(key) {
            Some(&offset) => offset,
            None => return Ok(Lookup::Absent),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut head = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut head)?;
        let mut cursor = &head[..];
        let key_len = cursor.get_u32_le();
        let val_len = cursor.get_u32_le();

        file.seek_relative(key_len as i64)?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(Lookup::Tombstone);
        }

        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;
        Ok(Lookup::Value(value))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// False only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Read every entry in key order (for compaction)
    pub fn scan(&self) -> Result<Vec<ScannedEntry>> {
        let mut file = self.file.lock();
        let entries = SSTableIterator::new(&mut file, self.index_offset)?.collect();
        entries
    }
}
