//! In-memory backend
//!
//! HashMap under an RwLock. Nothing survives a restart; useful for tests and
//! for running the server without a data directory.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;

use super::{copy_into, Backend, ReadStatus, RemoveStatus};

/// Volatile backend keeping every value in memory
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn read(&self, key: &[u8], buf: &mut [u8]) -> Result<ReadStatus> {
        let data = self.data.read();
        Ok(match data.get(key) {
            Some(value) => copy_into(value, buf),
            None => ReadStatus::NotFound,
        })
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<RemoveStatus> {
        Ok(match self.data.write().remove(key) {
            Some(_) => RemoveStatus::Removed,
            None => RemoveStatus::NotFound,
        })
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }
}
