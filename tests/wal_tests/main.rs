//! Tests for the write-ahead log
//!
//! These tests verify:
//! - Entry framing and checksum validation
//! - Appending, reopening, and LSN continuity
//! - Reading back entries in order
//! - Recovery from torn writes and corrupted frames

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use stashkv::config::WalSyncStrategy;
use stashkv::wal::{Operation, WalEntry, WalReader, WalRecovery, WalWriter, HEADER_SIZE};
use stashkv::StashError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn wal_path(dir: &TempDir) -> PathBuf {
    dir.path().join("wal.log")
}

fn put(key: &str, value: &str) -> Operation {
    Operation::Put {
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

fn write_entries(path: &Path, count: usize) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer.append(put(&format!("key{}", i), &format!("value{}", i))).unwrap();
    }
}

fn read_all(path: &Path) -> Vec<WalEntry> {
    WalReader::open(path)
        .unwrap()
        .entries()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

// =============================================================================
// Entry Tests
// =============================================================================

#[test]
fn test_entry_frame_roundtrip() {
    let entry = WalEntry::new(7, put("alpha", "beta"));
    let bytes = entry.serialize().unwrap();

    assert_eq!(bytes.len(), entry.serialized_size().unwrap());
    assert_eq!(WalEntry::deserialize(&bytes).unwrap(), entry);
}

#[test]
fn test_entry_header_layout() {
    let entry = WalEntry::new(0x0102, Operation::Delete { key: b"k".to_vec() });
    let bytes = entry.serialize().unwrap();

    assert_eq!(&bytes[..8], &0x0102u64.to_le_bytes());
    assert_eq!(&bytes[8..12], &entry.compute_crc().unwrap().to_le_bytes());
    let len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    assert_eq!(len, bytes.len() - HEADER_SIZE);
}

#[test]
fn test_entry_flipped_payload_bit_detected() {
    let mut bytes = WalEntry::new(1, put("key", "value")).serialize().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let result = WalEntry::deserialize(&bytes);
    assert!(matches!(result, Err(StashError::WalCorruption(_))));
}

#[test]
fn test_entry_flipped_lsn_detected() {
    let mut bytes = WalEntry::new(1, put("key", "value")).serialize().unwrap();
    bytes[0] = 2;

    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(StashError::WalCorruption(_))
    ));
}

#[test]
fn test_entry_truncated_frame_detected() {
    let bytes = WalEntry::new(1, put("key", "value")).serialize().unwrap();

    assert!(WalEntry::deserialize(&bytes[..HEADER_SIZE - 1]).is_err());
    assert!(WalEntry::deserialize(&bytes[..bytes.len() - 1]).is_err());
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_writer_assigns_sequential_lsns() {
    let dir = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&wal_path(&dir), WalSyncStrategy::EveryWrite).unwrap();

    assert_eq!(writer.current_lsn(), 1);
    assert_eq!(writer.append(put("a", "1")).unwrap(), 1);
    assert_eq!(writer.append(put("b", "2")).unwrap(), 2);
    assert_eq!(writer.current_lsn(), 3);
}

#[test]
fn test_writer_reopen_continues_lsn() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 5);

    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.append(put("next", "entry")).unwrap(), 6);
    drop(writer);

    let lsns: Vec<u64> = read_all(&path).iter().map(|e| e.lsn).collect();
    assert_eq!(lsns, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_writer_batches_syncs() {
    let dir = TempDir::new().unwrap();
    let mut writer = WalWriter::open(
        &wal_path(&dir),
        WalSyncStrategy::EveryNEntries { count: 3 },
    )
    .unwrap();

    writer.append(put("a", "1")).unwrap();
    writer.append(put("b", "2")).unwrap();
    assert_eq!(writer.uncommitted_count(), 2);

    writer.append(put("c", "3")).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

#[test]
fn test_writer_unsynced_entries_visible_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    let mut writer =
        WalWriter::open(&path, WalSyncStrategy::EveryNEntries { count: 100 }).unwrap();

    writer.append(put("a", "1")).unwrap();
    writer.append(put("b", "2")).unwrap();
    assert_eq!(writer.uncommitted_count(), 2);

    // Readable while the writer is still open and nothing was fsynced
    let entries = read_all(&path);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].lsn, 2);

    // A writer that never runs its destructor loses nothing either
    std::mem::forget(writer);
    assert_eq!(read_all(&path).len(), 2);
}

#[test]
fn test_writer_truncate_empties_log() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();

    writer.append(put("a", "1")).unwrap();
    writer.truncate().unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(writer.append(put("b", "2")).unwrap(), 1);
}

#[test]
fn test_writer_drops_torn_tail_before_appending() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 2);
    append_raw(&path, &[0xAB; 5]);

    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    writer.append(put("after", "crash")).unwrap();
    drop(writer);

    let entries = read_all(&path);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].operation, put("after", "crash"));
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_reader_returns_entries_in_order() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 10);

    let entries = read_all(&path);
    assert_eq!(entries.len(), 10);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.lsn, i as u64 + 1);
        assert_eq!(entry.operation, put(&format!("key{}", i), &format!("value{}", i)));
    }
}

#[test]
fn test_reader_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    fs::write(&path, b"").unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert!(reader.next_entry().unwrap().is_none());
    assert!(!reader.hit_partial_tail());
}

#[test]
fn test_reader_partial_tail_ends_log() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 3);
    let good_len = fs::metadata(&path).unwrap().len();
    append_raw(&path, &[1, 0, 0]);

    let mut reader = WalReader::open(&path).unwrap();
    let mut count = 0;
    while reader.next_entry().unwrap().is_some() {
        count += 1;
    }

    assert_eq!(count, 3);
    assert!(reader.hit_partial_tail());
    assert_eq!(reader.valid_offset(), good_len);
}

#[test]
fn test_reader_corrupt_frame_is_error() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 2);

    let mut bytes = fs::read(&path).unwrap();
    bytes[HEADER_SIZE + 1] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert!(matches!(reader.next_entry(), Err(StashError::WalCorruption(_))));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recovery_clean_log() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 4);

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(result.entries_recovered, 4);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 4);
    assert!(!result.was_truncated);
}

#[test]
fn test_recovery_truncates_torn_write() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 3);
    let good_len = fs::metadata(&path).unwrap().len();

    // Half of a fourth frame
    let torn = WalEntry::new(4, put("torn", "write")).serialize().unwrap();
    append_raw(&path, &torn[..torn.len() / 2]);

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
}

#[test]
fn test_recovery_stops_at_corruption() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 2);
    let first_two = fs::metadata(&path).unwrap().len();

    let mut bad = WalEntry::new(3, put("bad", "entry")).serialize().unwrap();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    append_raw(&path, &bad);
    append_raw(&path, &WalEntry::new(4, put("later", "entry")).serialize().unwrap());

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 2);
    assert_eq!(fs::metadata(&path).unwrap().len(), first_two);
}

#[test]
fn test_verify_does_not_modify() {
    let dir = TempDir::new().unwrap();
    let path = wal_path(&dir);
    write_entries(&path, 2);
    append_raw(&path, &[0u8; 7]);
    let len_before = fs::metadata(&path).unwrap().len();

    let result = WalRecovery::verify(&path).unwrap();
    assert_eq!(result.entries_recovered, 2);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
}
