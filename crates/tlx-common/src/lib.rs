//! tlx common types, IDs, and errors.
//!
//! This crate provides the data model shared by every tlx crate:
//! - Telemetry records as produced by instrumented code
//! - Transmissions: compressed, serialized batches ready for delivery
//! - Construction-time configuration errors

pub mod error;
pub mod id;
pub mod record;
pub mod transmission;

pub use error::{ConfigurationError, Result};
pub use id::TransmissionId;
pub use record::TelemetryRecord;
pub use transmission::{Transmission, CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP, ENCODING_IDENTITY};

/// Version of the newline-delimited payload layout.
pub const PAYLOAD_VERSION: &str = "1.0.0";
