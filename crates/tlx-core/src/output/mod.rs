//! Transmission outputs.
//!
//! An output knows how to make one delivery attempt. The network output
//! talks HTTP; the disk output writes to the overflow store. The `active`
//! wrappers run them on worker threads so dispatch never blocks.

pub mod active;
pub mod disk;
pub mod network;

pub use active::{ActiveDiskOutput, ActiveNetworkOutput};
pub use disk::DiskOutput;
pub use network::HttpOutput;

use std::time::Duration;

use tlx_common::Transmission;

/// What happened on one network attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptReport {
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    /// Parsed `Retry-After`, if present.
    pub retry_after: Option<Duration>,
    /// Response body, read for partial acceptance and error statuses.
    pub body: Option<String>,
    /// Transport failure description when no response arrived.
    pub error: Option<String>,
}

impl AttemptReport {
    pub fn status(code: u16) -> Self {
        AttemptReport {
            status: Some(code),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        AttemptReport {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}

/// A synchronous delivery attempt.
pub trait TransmissionOutput: Send + Sync {
    fn send(&self, transmission: &Transmission) -> AttemptReport;
}
