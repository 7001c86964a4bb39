//! Error types for StashKV
//!
//! Provides a unified error type for all operations.
//!
//! Expected outcomes such as a missing key are NOT errors: reads return
//! `Option`, deletes return an outcome enum. Only genuine failures land here.

use thiserror::Error;

/// Result type alias using StashError
pub type Result<T> = std::result::Result<T, StashError>;

/// Unified error type for StashKV operations
#[derive(Debug, Error)]
pub enum StashError {
    // -------------------------------------------------------------------------
    // Item Errors
    // -------------------------------------------------------------------------
    #[error("Allocation of {size} bytes failed")]
    Allocation { size: usize },

    #[error("Malformed item: {0}")]
    MalformedItem(String),

    #[error("Invalid value length {0}: must include the 2-byte terminator")]
    InvalidValueLength(usize),

    #[error("Key too long: {0} bytes")]
    KeyTooLong(usize),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StashError {
    fn from(err: bincode::Error) -> Self {
        StashError::Serialization(err.to_string())
    }
}
