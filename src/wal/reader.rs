//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, StashError};

use super::entry::{FrameHeader, HEADER_SIZE, MAX_ENTRY_SIZE};
use super::WalEntry;

/// Reads entries from the WAL file
///
/// A frame cut short by a crash ends the log (`Ok(None)` with
/// `hit_partial_tail()` set). A complete frame that fails its checksum is
/// `WalCorruption`.
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last entry returned
    valid_offset: u64,
    partial_tail: bool,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            valid_offset: 0,
            partial_tail: false,
        })
    }

    /// Read the next entry from the WAL
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            self.partial_tail = true;
            return Ok(None);
        }

        let header = FrameHeader::decode(&header);
        if header.len > MAX_ENTRY_SIZE {
            return Err(StashError::WalCorruption(format!(
                "frame at offset {} declares {} bytes",
                self.valid_offset, header.len
            )));
        }

        let mut payload = vec![0u8; header.len];
        if read_full(&mut self.reader, &mut payload)? < header.len {
            self.partial_tail = true;
            return Ok(None);
        }

        let entry = WalEntry::from_payload(header, &payload)?;
        self.valid_offset += (HEADER_SIZE + header.len) as u64;
        Ok(Some(entry))
    }

    /// Iterate over all valid entries, stopping after the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Offset just past the last valid entry read so far
    pub fn valid_offset(&self) -> u64 {
        self.valid_offset
    }

    /// Whether the log ended in an incomplete frame
    pub fn hit_partial_tail(&self) -> bool {
        self.partial_tail
    }
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the stream allows; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
