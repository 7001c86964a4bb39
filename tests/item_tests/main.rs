//! Tests for the item layout, buffer pool, and allocator
//!
//! These tests verify:
//! - Item layout and size computation
//! - Accessors for key, suffix, value, and flags
//! - Pool-sized vs. oversized allocation and release
//! - Freelist growth and its ceiling
//! - Concurrent allocation through a shared allocator

use std::sync::Arc;
use std::thread;

use stashkv::item::layout::{compute_header, format_suffix, min_item_size, parse_suffix};
use stashkv::item::{ItemAllocator, ItemHeader, ItemPool, HEADER_SIZE, MAX_KEY_LENGTH};
use stashkv::StashError;

// =============================================================================
// Helper Functions
// =============================================================================

fn filled_item(allocator: &ItemAllocator, key: &[u8], flags: u32, value: &[u8]) -> stashkv::Item {
    let mut item = allocator.alloc_fresh(key, flags, value.len() + 2).unwrap();
    item.set_value(value).unwrap();
    item
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_foo_bar_layout() {
    let allocator = ItemAllocator::new(256);
    let item = filled_item(&allocator, b"foo", 0, b"bar");

    // header + "foo\0" + " 0 3\r\n" + "bar\r\n"
    assert_eq!(item.ntotal().unwrap(), HEADER_SIZE + 4 + 6 + 5);
    assert_eq!(item.key().unwrap(), b"foo");
    assert_eq!(item.suffix().unwrap(), b" 0 3\r\n");
    assert_eq!(item.data().unwrap(), b"bar\r\n");
    assert_eq!(item.value().unwrap(), b"bar");
    assert_eq!(item.flags().unwrap(), 0);
}

#[test]
fn test_size_matches_component_sum() {
    for (key_len, flags, value_len) in [(1, 0, 0), (10, 42, 100), (250, u32::MAX, 1000)] {
        let (header, suffix) = compute_header(key_len, flags, value_len + 2).unwrap();
        assert_eq!(
            header.ntotal(),
            HEADER_SIZE + key_len + 1 + suffix.len() + value_len + 2
        );
    }
}

#[test]
fn test_suffix_format_and_parse() {
    let suffix = format_suffix(7, 12).unwrap();
    assert_eq!(suffix.as_bytes(), b" 7 10\r\n");
    assert_eq!(parse_suffix(suffix.as_bytes()).unwrap(), (7, 10));
}

#[test]
fn test_widest_suffix_fits() {
    let suffix = format_suffix(u32::MAX, u32::MAX as usize).unwrap();
    assert!(suffix.len() <= 40);
}

#[test]
fn test_header_decode_rejects_garbage() {
    let result = ItemHeader::decode(&[0xFF; 16]);
    assert!(matches!(result, Err(StashError::MalformedItem(_))));

    let short = ItemHeader::decode(&[0u8; 4]);
    assert!(matches!(short, Err(StashError::MalformedItem(_))));
}

#[test]
fn test_key_too_long_rejected() {
    let allocator = ItemAllocator::new(256);
    let key = vec![b'k'; MAX_KEY_LENGTH + 1];

    let result = allocator.alloc_fresh(&key, 0, 4);
    assert!(matches!(result, Err(StashError::KeyTooLong(251))));

    // Exactly at the limit is fine
    let key = vec![b'k'; MAX_KEY_LENGTH];
    assert!(allocator.alloc_fresh(&key, 0, 4).is_ok());
}

#[test]
fn test_value_length_without_terminator_rejected() {
    let allocator = ItemAllocator::new(256);
    let result = allocator.alloc_fresh(b"key", 0, 1);
    assert!(matches!(result, Err(StashError::InvalidValueLength(1))));
}

#[test]
fn test_set_value_requires_exact_length() {
    let allocator = ItemAllocator::new(256);
    let mut item = allocator.alloc_fresh(b"key", 0, 7).unwrap();

    assert!(matches!(
        item.set_value(b"toolong"),
        Err(StashError::InvalidValueLength(_))
    ));
    item.set_value(b"hello").unwrap();
    assert_eq!(item.value().unwrap(), b"hello");
}

#[test]
fn test_empty_value() {
    let allocator = ItemAllocator::new(256);
    let item = filled_item(&allocator, b"empty", 9, b"");

    assert_eq!(item.data().unwrap(), b"\r\n");
    assert_eq!(item.value().unwrap(), b"");
    assert_eq!(item.flags().unwrap(), 9);
}

#[test]
fn test_min_item_size() {
    let (header, _) = compute_header(0, 0, 2).unwrap();
    assert_eq!(header.ntotal(), min_item_size());
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_pool_sized_item_uses_standard_buffer() {
    let allocator = ItemAllocator::new(128);
    let item = filled_item(&allocator, b"small", 0, b"value");

    assert_eq!(item.capacity(), 128);
}

#[test]
fn test_oversized_item_gets_exact_buffer() {
    let allocator = ItemAllocator::new(128);
    let value = vec![b'x'; 500];
    let item = filled_item(&allocator, b"big", 0, &value);

    assert_eq!(item.capacity(), item.ntotal().unwrap());
    assert!(item.capacity() > 128);
}

#[test]
fn test_item_exactly_at_threshold_is_pool_sized() {
    // header(8) + "k\0"(2) + " 0 N\r\n" + data
    let (header, _) = compute_header(1, 0, 100).unwrap();
    let allocator = ItemAllocator::new(header.ntotal());

    let item = filled_item(&allocator, b"k", 0, &[b'v'; 98]);
    assert_eq!(item.capacity(), header.ntotal());

    allocator.release(item);
    assert_eq!(allocator.pool().len(), 1);
}

#[test]
fn test_raw_item_sizes() {
    let allocator = ItemAllocator::new(64);

    assert_eq!(allocator.alloc_raw(10).unwrap().capacity(), 64);
    assert_eq!(allocator.alloc_raw(64).unwrap().capacity(), 64);
    assert_eq!(allocator.alloc_raw(65).unwrap().capacity(), 65);
}

// =============================================================================
// Release Tests
// =============================================================================

#[test]
fn test_release_pool_sized_returns_to_freelist() {
    let allocator = ItemAllocator::new(128);
    let item = filled_item(&allocator, b"key", 0, b"value");

    allocator.release(item);
    assert_eq!(allocator.pool().len(), 1);

    // The next allocation reuses it
    let _again = allocator.alloc_fresh(b"other", 0, 4).unwrap();
    assert_eq!(allocator.pool().len(), 0);
}

#[test]
fn test_release_oversized_bypasses_freelist() {
    let allocator = ItemAllocator::new(64);
    let item = filled_item(&allocator, b"key", 0, &[b'x'; 200]);

    allocator.release(item);
    assert_eq!(allocator.pool().len(), 0);
}

#[test]
fn test_release_unfilled_standard_buffer_is_pooled() {
    let allocator = ItemAllocator::new(64);
    let raw = allocator.alloc_raw(10).unwrap();

    allocator.release(raw);
    assert_eq!(allocator.pool().len(), 1);
}

#[test]
fn test_release_unfilled_large_buffer_is_freed() {
    let allocator = ItemAllocator::new(64);
    let raw = allocator.alloc_raw(1000).unwrap();

    allocator.release(raw);
    assert_eq!(allocator.pool().len(), 0);
}

#[test]
fn test_release_opt_none_is_noop() {
    let allocator = ItemAllocator::new(64);
    allocator.release_opt(None);
    assert!(allocator.pool().is_empty());
}

// =============================================================================
// Freelist Tests
// =============================================================================

#[test]
fn test_pool_grows_by_doubling() {
    let pool = ItemPool::with_limits(32, 2, 8);

    for _ in 0..3 {
        pool.release(vec![0u8; 32]).unwrap();
    }
    assert_eq!(pool.capacity(), 4);

    for _ in 0..2 {
        pool.release(vec![0u8; 32]).unwrap();
    }
    assert_eq!(pool.capacity(), 8);
}

#[test]
fn test_pool_never_exceeds_ceiling() {
    let pool = ItemPool::with_limits(32, 2, 8);

    let refused = (0..20)
        .filter(|_| pool.release(vec![0u8; 32]).is_err())
        .count();

    assert_eq!(pool.len(), 8);
    assert_eq!(pool.max_capacity(), 8);
    assert_eq!(refused, 12);
}

#[test]
fn test_pool_rejects_wrong_size_buffer() {
    let pool = ItemPool::with_limits(32, 2, 8);

    assert!(pool.release(vec![0u8; 31]).is_err());
    assert!(pool.release(vec![0u8; 33]).is_err());
    assert!(pool.is_empty());
}

#[test]
fn test_pool_acquire_prefers_recycled() {
    let pool = ItemPool::with_limits(16, 2, 4);
    pool.release(vec![0xAB; 16]).unwrap();

    let buf = pool.acquire().unwrap();
    assert_eq!(buf, vec![0xAB; 16]);

    let fresh = pool.acquire().unwrap();
    assert_eq!(fresh, vec![0u8; 16]);
}

#[test]
fn test_allocator_over_bounded_pool_drops_extras() {
    let allocator = ItemAllocator::with_pool(ItemPool::with_limits(64, 1, 2));
    let items: Vec<_> = (0..5)
        .map(|i| filled_item(&allocator, format!("k{}", i).as_bytes(), 0, b"v"))
        .collect();

    for item in items {
        allocator.release(item);
    }
    assert_eq!(allocator.pool().len(), 2);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_alloc_release() {
    let allocator = Arc::new(ItemAllocator::with_pool(ItemPool::with_limits(128, 4, 64)));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("t{}-k{}", t, i);
                    let value = format!("value-{}", i);
                    let mut item = allocator
                        .alloc_fresh(key.as_bytes(), i, value.len() + 2)
                        .unwrap();
                    item.set_value(value.as_bytes()).unwrap();
                    assert_eq!(item.key().unwrap(), key.as_bytes());
                    assert_eq!(item.flags().unwrap(), i);
                    allocator.release(item);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(allocator.pool().len() <= 64);
}
