//! SSTable Builder
//!
//! Writes sorted key-value entries to a new SSTable file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;

use crate::error::{Result, StashError};

use super::{SSTable, ENTRY_HEADER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating new SSTables from sorted entries
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    /// Offset where the next entry will land
    offset: u64,
    /// Key → entry offset, in insertion (sorted) order
    index: Vec<(Vec<u8>, u64)>,
    /// Running CRC of the data block
    data_hasher: crc32fast::Hasher,
}

/// Length as stored in an entry head. `u32::MAX` is the tombstone marker,
/// so the largest storable length is one below it.
fn entry_len(len: usize, what: &str) -> Result<u32> {
    match u32::try_from(len) {
        Ok(len) if len < TOMBSTONE_MARKER => Ok(len),
        _ => Err(StashError::Storage(format!(
            "{} of {} bytes is too large for an SSTable entry",
            what, len
        ))),
    }
}

impl SSTableBuilder {
    /// Create the file and write a header with a placeholder entry count.
    ///
    /// Entries must then be added in strictly ascending key order.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.put_slice(MAGIC);
        header.put_u16_le(VERSION);
        header.put_u64_le(0);
        writer.write_all(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            offset: HEADER_SIZE,
            index: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Add a key-value pair
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_entry(key, Some(value))
    }

    /// Add a tombstone
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.write_entry(key, None)
    }

    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(StashError::Storage(
                    "SSTable keys must be added in ascending order".to_string(),
                ));
            }
        }

        let key_len = entry_len(key.len(), "key")?;
        let val_len = match value {
            Some(v) => entry_len(v.len(), "value")?,
            None => TOMBSTONE_MARKER,
        };

        let mut head = [0u8; ENTRY_HEADER_SIZE];
        {
            let mut cursor: &mut [u8] = &mut head;
            cursor.put_u32_le(key_len);
            cursor.put_u32_le(val_len);
        }

        self.writer.write_all(&head)?;
        self.writer.write_all(key)?;
        self.data_hasher.update(&head);
        self.data_hasher.update(key);
        if let Some(v) = value {
            self.writer.write_all(v)?;
            self.data_hasher.update(v);
        }

        self.index.push((key.to_vec(), self.offset));
        self.offset += (ENTRY_HEADER_SIZE + key.len() + value.map_or(0, <[u8]>::len)) as u64;
        self.entry_count += 1;
        Ok(())
    }

    /// Write index block and footer, patch the entry count, fsync
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.offset;

        for (key, offset) in &self.index {
            let mut record = Vec::with_capacity(12 + key.len());
            record.put_u32_le(key.len() as u32);
            record.put_u64_le(*offset);
            record.put_slice(key);
            self.writer.write_all(&record)?;
        }

        let mut footer = Vec::with_capacity(16);
        footer.put_u64_le(index_offset);
        footer.put_u32_le(self.data_hasher.finalize());
        footer.put_u32_le(0);
        self.writer.write_all(&footer)?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StashError::Storage(format!("Failed to flush SSTable: {}", e)))?;
        file.seek(SeekFrom::Start((MAGIC.len() + 2) as u64))?;
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();
        let min_key = self.index.first().map(|(k, _)| k.clone()).unwrap_or_default();
        let max_key = self.index.last().map(|(k, _)| k.clone()).unwrap_or_default();

        Ok(SSTable {
            path: self.path,
            entry_count: self.entry_count,
            min_key,
            max_key,
            file_size,
        })
    }
}
