//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StashError};

/// Frame header size: LSN (8) + CRC (4) + payload length (4)
pub const HEADER_SIZE: usize = 16;

/// Largest payload a frame may declare; anything bigger is corruption
pub const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

/// Decoded frame header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: usize,
}

impl FrameHeader {
    pub(crate) fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut cursor = &bytes[..];
        let lsn = cursor.get_u64_le();
        let crc = cursor.get_u32_le();
        let len = cursor.get_u32_le() as usize;
        Self { lsn, crc, len }
    }
}

/// CRC over the LSN, the length, and the payload
fn frame_crc(lsn: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

impl WalEntry {
    /// Create an entry stamped with the current time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(&self.operation, self.timestamp))?)
    }

    /// Frame the entry: `[lsn][crc][len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        if payload.len() > MAX_ENTRY_SIZE {
            return Err(StashError::Serialization(format!(
                "WAL entry of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.put_u64_le(self.lsn);
        out.put_u32_le(frame_crc(self.lsn, &payload));
        out.put_u32_le(payload.len() as u32);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse one framed entry from the front of `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StashError::WalCorruption(format!(
                "frame header truncated: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = FrameHeader::decode(&header);

        let end = HEADER_SIZE + header.len;
        if header.len > MAX_ENTRY_SIZE || bytes.len() < end {
            return Err(StashError::WalCorruption(format!(
                "frame payload truncated: declared {} bytes, {} available",
                header.len,
                bytes.len() - HEADER_SIZE
            )));
        }

        Self::from_payload(header, &bytes[HEADER_SIZE..end])
    }

    /// Verify a payload against its header and decode it
    pub(crate) fn from_payload(header: FrameHeader, payload: &[u8]) -> Result<Self> {
        let actual = frame_crc(header.lsn, payload);
        if actual != header.crc {
            return Err(StashError::WalCorruption(format!(
                "CRC mismatch at lsn {}: stored {:08x}, computed {:08x}",
                header.lsn, header.crc, actual
            )));
        }

        let (operation, timestamp): (Operation, u64) = bincode::deserialize(payload)
            .map_err(|e| StashError::WalCorruption(format!("undecodable entry: {}", e)))?;

        Ok(Self {
            lsn: header.lsn,
            operation,
            timestamp,
        })
    }

    /// Size of the framed entry
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(HEADER_SIZE + bincode::serialized_size(&(&self.operation, self.timestamp))? as usize)
    }

    /// Checksum stored in the frame header
    pub fn compute_crc(&self) -> Result<u32> {
        Ok(frame_crc(self.lsn, &self.payload()?))
    }
}
