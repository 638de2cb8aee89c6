//! Transmissions: serialized, compressed batches.

use chrono::{DateTime, SubsecRound, Utc};

use crate::id::TransmissionId;

/// Content type of a newline-delimited JSON payload.
pub const CONTENT_TYPE_JSON_STREAM: &str = "application/x-json-stream";

/// Content encoding for gzip-compressed payloads.
pub const ENCODING_GZIP: &str = "gzip";

/// Content encoding for uncompressed payloads.
pub const ENCODING_IDENTITY: &str = "identity";

/// A payload ready for one delivery attempt.
///
/// Immutable once built. Network and disk outputs only ever borrow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    id: TransmissionId,
    content: Vec<u8>,
    content_type: String,
    content_encoding: String,
    created_at: DateTime<Utc>,
}

impl Transmission {
    /// Build a transmission with a fresh identifier. The creation time is
    /// kept at microsecond precision.
    pub fn new(
        content: Vec<u8>,
        content_type: impl Into<String>,
        content_encoding: impl Into<String>,
    ) -> Self {
        Self::restore(
            TransmissionId::new(),
            content,
            content_type,
            content_encoding,
            Utc::now().trunc_subsecs(6),
        )
    }

    /// Rebuild a transmission that was persisted earlier.
    pub fn restore(
        id: TransmissionId,
        content: Vec<u8>,
        content_type: impl Into<String>,
        content_encoding: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Transmission {
            id,
            content,
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
            created_at,
        }
    }

    pub fn id(&self) -> TransmissionId {
        self.id
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_encoding(&self) -> &str {
        &self.content_encoding
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn is_gzip(&self) -> bool {
        self.content_encoding.eq_ignore_ascii_case(ENCODING_GZIP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmission_metadata() {
        let t = Transmission::new(vec![1, 2, 3], CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP);
        assert_eq!(t.len(), 3);
        assert!(!t.is_empty());
        assert!(t.is_gzip());
        assert_eq!(t.content_type(), "application/x-json-stream");
    }

    #[test]
    fn test_restore_keeps_identity() {
        let original = Transmission::new(b"{}".to_vec(), CONTENT_TYPE_JSON_STREAM, ENCODING_IDENTITY);
        let restored = Transmission::restore(
            original.id(),
            original.content().to_vec(),
            original.content_type(),
            original.content_encoding(),
            original.created_at(),
        );
        assert_eq!(original, restored);
        assert!(!restored.is_gzip());
    }
}
