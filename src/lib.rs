//! # StashKV
//!
//! A memcached-style item store on top of a persistent key-value engine:
//! - Self-describing items (header, key, suffix, value) in one buffer
//! - A bounded freelist recycling standard-sized item buffers
//! - get/put/delete/exists with an automatic buffer-too-small retry
//! - A bundled log-structured engine (WAL + MemTable + SSTables)
//! - TCP-based client protocol
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                             │
//! │                  (Multiple Clients)                         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     ItemStore                               │
//! │        (get / put / delete / exists on items)               │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!   ┌─────────────────┐            ┌─────────────────┐
//!   │  ItemAllocator  │            │     Backend     │
//!   │   + ItemPool    │            │ Engine / Memory │
//!   └─────────────────┘            └────────┬────────┘
//!                                           │
//!                            ┌──────────────┼──────────────┐
//!                            ▼              ▼              ▼
//!                         ┌─────┐     ┌──────────┐   ┌──────────┐
//!                         │ WAL │     │ MemTable │   │ SSTables │
//!                         └─────┘     └──────────┘   └──────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod backend;
pub mod item;
pub mod store;

pub mod engine;
pub mod memtable;
pub mod storage;
pub mod wal;

pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use backend::{Backend, MemoryBackend, ReadStatus, RemoveStatus};
pub use config::Config;
pub use engine::Engine;
pub use error::{Result, StashError};
pub use item::{Item, ItemAllocator, ItemPool};
pub use store::{DeleteOutcome, ItemStore};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
