//! Tests for SSTables and the StorageManager
//!
//! These tests verify:
//! - SSTable build/read for values and tombstones
//! - Rejection of unsorted input and damaged files
//! - Flushing MemTables and reading newest → oldest
//! - Compaction and reopening from disk

use std::fs;
use std::path::PathBuf;

use stashkv::memtable::MemTable;
use stashkv::storage::{Lookup, SSTableBuilder, SSTableReader, StorageManager};
use stashkv::StashError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn table_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn build_table(dir: &TempDir, name: &str, entries: &[(&str, Option<&str>)]) -> PathBuf {
    let path = table_path(dir, name);
    let mut builder = SSTableBuilder::new(&path).unwrap();
    for (key, value) in entries {
        match value {
            Some(v) => builder.add(key.as_bytes(), v.as_bytes()).unwrap(),
            None => builder.add_tombstone(key.as_bytes()).unwrap(),
        }
    }
    builder.finish().unwrap();
    path
}

fn memtable_with(entries: &[(&str, Option<&str>)]) -> MemTable {
    let memtable = MemTable::new();
    for (key, value) in entries {
        match value {
            Some(v) => memtable.put(key.as_bytes().to_vec(), v.as_bytes().to_vec()),
            None => memtable.delete(key.as_bytes().to_vec()),
        };
    }
    memtable
}

// =============================================================================
// SSTable Tests
// =============================================================================

#[test]
fn test_sstable_build_and_get() {
    let dir = TempDir::new().unwrap();
    let path = build_table(
        &dir,
        "t.sst",
        &[("apple", Some("red")), ("banana", Some("yellow")), ("cherry", None)],
    );

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 3);
    assert_eq!(reader.get(b"apple").unwrap(), Lookup::Value(b"red".to_vec()));
    assert_eq!(reader.get(b"banana").unwrap(), Lookup::Value(b"yellow".to_vec()));
    assert_eq!(reader.get(b"cherry").unwrap(), Lookup::Tombstone);
    assert_eq!(reader.get(b"date").unwrap(), Lookup::Absent);
}

#[test]
fn test_sstable_key_range() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, "t.sst", &[("b", Some("1")), ("d", Some("2"))]);
    let reader = SSTableReader::open(&path).unwrap();

    assert_eq!(reader.min_key(), Some(&b"b"[..]));
    assert_eq!(reader.max_key(), Some(&b"d"[..]));
    assert!(reader.might_contain(b"c"));
    assert!(!reader.might_contain(b"a"));
    assert!(!reader.might_contain(b"e"));
}

#[test]
fn test_sstable_binary_values() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, "bin.sst");
    let value: Vec<u8> = (0..=255u8).collect();

    let mut builder = SSTableBuilder::new(&path).unwrap();
    builder.add(b"bin", &value).unwrap();
    builder.add(b"empty", b"").unwrap();
    builder.finish().unwrap();

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.get(b"bin").unwrap(), Lookup::Value(value));
    assert_eq!(reader.get(b"empty").unwrap(), Lookup::Value(Vec::new()));
}

#[test]
fn test_sstable_scan_in_order() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, "t.sst", &[("a", Some("1")), ("b", None), ("c", Some("3"))]);
    let reader = SSTableReader::open(&path).unwrap();

    let entries = reader.scan().unwrap();
    assert_eq!(
        entries,
        vec![
            (b"a".to_vec(), Some(b"1".to_vec())),
            (b"b".to_vec(), None),
            (b"c".to_vec(), Some(b"3".to_vec())),
        ]
    );
}

#[test]
fn test_sstable_rejects_unsorted_keys() {
    let dir = TempDir::new().unwrap();
    let mut builder = SSTableBuilder::new(&table_path(&dir, "t.sst")).unwrap();

    builder.add(b"m", b"1").unwrap();
    assert!(matches!(builder.add(b"a", b"2"), Err(StashError::Storage(_))));
    assert!(matches!(builder.add(b"m", b"3"), Err(StashError::Storage(_))));
}

#[test]
fn test_sstable_bad_magic_rejected() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, "t.sst", &[("a", Some("1"))]);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = b'X';
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(SSTableReader::open(&path), Err(StashError::Storage(_))));
}

#[test]
fn test_sstable_data_corruption_rejected() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, "t.sst", &[("key", Some("value"))]);

    // First byte of the value, just past the header and entry head
    let mut bytes = fs::read(&path).unwrap();
    bytes[14 + 8 + 3] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(SSTableReader::open(&path), Err(StashError::Storage(_))));
}

#[test]
fn test_sstable_truncated_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = table_path(&dir, "t.sst");
    fs::write(&path, b"STKV").unwrap();

    assert!(SSTableReader::open(&path).is_err());
}

// =============================================================================
// StorageManager Tests
// =============================================================================

#[test]
fn test_manager_starts_empty() {
    let dir = TempDir::new().unwrap();
    let manager = StorageManager::open(dir.path()).unwrap();

    assert_eq!(manager.sstable_count(), 0);
    assert_eq!(manager.next_sstable_id(), 1);
    assert_eq!(manager.get(b"anything").unwrap(), None);
}

#[test]
fn test_manager_flush_and_get() {
    let dir = TempDir::new().unwrap();
    let manager = StorageManager::open(dir.path()).unwrap();

    let metadata = manager
        .flush(&memtable_with(&[("k1", Some("v1")), ("k2", Some("v2"))]))
        .unwrap();

    assert_eq!(metadata.entry_count, 2);
    assert_eq!(manager.sstable_count(), 1);
    assert_eq!(manager.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(manager.get(b"k3").unwrap(), None);
}

#[test]
fn test_manager_flush_empty_memtable_fails() {
    let dir = TempDir::new().unwrap();
    let manager = StorageManager::open(dir.path()).unwrap();

    assert!(matches!(
        manager.flush(&MemTable::new()),
        Err(StashError::Storage(_))
    ));
}

#[test]
fn test_manager_newest_table_wins() {
    let dir = TempDir::new().unwrap();
    let manager = StorageManager::open(dir.path()).unwrap();

    manager.flush(&memtable_with(&[("key", Some("old")), ("gone", Some("x"))])).unwrap();
    manager.flush(&memtable_with(&[("key", Some("new")), ("gone", None)])).unwrap();

    assert_eq!(manager.get(b"key").unwrap(), Some(b"new".to_vec()));
    assert_eq!(manager.get(b"gone").unwrap(), None);
}

#[test]
fn test_manager_reopen_loads_tables() {
    let dir = TempDir::new().unwrap();
    {
        let manager = StorageManager::open(dir.path()).unwrap();
        manager.flush(&memtable_with(&[("a", Some("1"))])).unwrap();
        manager.flush(&memtable_with(&[("a", Some("2"))])).unwrap();
    }

    let manager = StorageManager::open(dir.path()).unwrap();
    assert_eq!(manager.sstable_count(), 2);
    assert_eq!(manager.next_sstable_id(), 3);
    assert_eq!(manager.get(b"a").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_manager_compaction_merges_and_drops_tombstones() {
    let dir = TempDir::new().unwrap();
    let manager = StorageManager::open(dir.path()).unwrap();

    manager
        .flush(&memtable_with(&[("a", Some("1")), ("b", Some("1")), ("c", Some("1"))]))
        .unwrap();
    manager.flush(&memtable_with(&[("b", Some("2")), ("c", None)])).unwrap();

    let compacted = manager.compact().unwrap().unwrap();
    assert_eq!(compacted.entry_count, 2);
    assert_eq!(manager.sstable_count(), 1);

    assert_eq!(manager.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(manager.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(manager.get(b"c").unwrap(), None);

    let files = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[test]
fn test_manager_compaction_needs_two_tables() {
    let dir = TempDir::new().unwrap();
    let manager = StorageManager::open(dir.path()).unwrap();
    manager.flush(&memtable_with(&[("a", Some("1"))])).unwrap();

    assert!(manager.compact().unwrap().is_none());
    assert_eq!(manager.sstable_count(), 1);
}
