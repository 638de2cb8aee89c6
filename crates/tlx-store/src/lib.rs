//! Durable overflow store for transmissions.
//!
//! Payloads that cannot be sent right now are written here, one file per
//! transmission, and replayed oldest-first once delivery is possible again.
//! Total bytes on disk never exceed the configured capacity: a write that
//! would cross it is rejected and nothing already stored is evicted.

pub mod entry;
pub mod store;

pub use entry::{decode_entry, encode_entry, EntryHeader, EntryId};
pub use store::{DiskStore, StoreStats};

use thiserror::Error;

/// Errors from the overflow store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("corrupt entry {entry}: {reason}")]
    Corrupt { entry: String, reason: String },
}

impl StoreError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            StoreError::Io(_) => 70,
            StoreError::Json(_) => 71,
            StoreError::CapacityExceeded { .. } => 72,
            StoreError::Corrupt { .. } => 73,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
