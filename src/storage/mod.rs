//! Storage Module
//!
//! Persistent sorted-table layer of the bundled engine.
//!
//! ## Responsibilities
//! - Persist flushed memtables to disk in sorted format
//! - Point lookups through in-memory indexes
//! - Full compaction into a single table
//!
//! See `sstable` for the file format.

mod manager;
mod sstable;

pub use manager::StorageManager;
pub use sstable::{Lookup, SSTable, SSTableBuilder, SSTableIterator, SSTableReader, ScannedEntry};
