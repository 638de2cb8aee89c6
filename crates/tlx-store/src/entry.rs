//! On-disk entry format.
//!
//! An entry is one JSON header line followed by the raw payload bytes:
//!
//! ```text
//! {"id":"…","content_type":"application/x-json-stream","content_encoding":"gzip","created_at":1768487422000000,"len":1234}\n
//! <1234 payload bytes>
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tlx_common::{Transmission, TransmissionId};

use crate::{Result, StoreError};

/// Entry file extension.
pub const ENTRY_EXTENSION: &str = "trn";

/// Extension used while an entry is being written.
pub const TEMP_EXTENSION: &str = "tmp";

/// Metadata line at the start of every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub id: TransmissionId,
    pub content_type: String,
    pub content_encoding: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    pub len: u64,
}

/// Name of a stored entry (file name without extension).
///
/// Names start with the zero-padded creation time, so lexical order is
/// oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    /// Build the name for a transmission persisted with the given sequence.
    pub fn for_transmission(transmission: &Transmission, sequence: u64) -> Self {
        let micros = transmission.created_at().timestamp_micros().max(0);
        EntryId(format!(
            "{:016}-{:06}-{}",
            micros,
            sequence % 1_000_000,
            transmission.id()
        ))
    }

    /// Recover an entry id from a file name like `…-….trn`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(&format!(".{ENTRY_EXTENSION}"))?;
        let mut parts = stem.splitn(3, '-');
        let micros = parts.next()?;
        let seq = parts.next()?;
        let id = parts.next()?;
        let digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(micros, 16) || !digits(seq, 6) || TransmissionId::parse(id).is_none() {
            return None;
        }
        Some(EntryId(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, ENTRY_EXTENSION)
    }

    pub fn temp_file_name(&self) -> String {
        format!("{}.{}", self.0, TEMP_EXTENSION)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a transmission into entry bytes.
pub fn encode_entry(transmission: &Transmission) -> Result<Vec<u8>> {
    let header = EntryHeader {
        id: transmission.id(),
        content_type: transmission.content_type().to_string(),
        content_encoding: transmission.content_encoding().to_string(),
        created_at: transmission.created_at(),
        len: transmission.len() as u64,
    };
    let mut out = serde_json::to_vec(&header)?;
    out.reserve(transmission.len() + 1);
    out.push(b'\n');
    out.extend_from_slice(transmission.content());
    Ok(out)
}

/// Parse entry bytes back into a transmission.
pub fn decode_entry(name: &str, bytes: &[u8]) -> Result<Transmission> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        entry: name.to_string(),
        reason: reason.to_string(),
    };

    let split = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| corrupt("missing header line"))?;
    let header: EntryHeader =
        serde_json::from_slice(&bytes[..split]).map_err(|e| corrupt(&e.to_string()))?;
    let payload = &bytes[split + 1..];
    if payload.len() as u64 != header.len {
        return Err(corrupt(&format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.len
        )));
    }

    Ok(Transmission::restore(
        header.id,
        payload.to_vec(),
        header.content_type,
        header.content_encoding,
        header.created_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlx_common::{CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP};

    fn sample() -> Transmission {
        Transmission::new(b"line one\nline two".to_vec(), CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP)
    }

    #[test]
    fn test_encode_decode_entry() {
        let t = sample();
        let bytes = encode_entry(&t).unwrap();
        let back = decode_entry("x", &bytes).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_payload_may_contain_newlines() {
        let t = Transmission::new(b"\n\n\n".to_vec(), CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP);
        let back = decode_entry("x", &encode_entry(&t).unwrap()).unwrap();
        assert_eq!(back.content(), b"\n\n\n");
    }

    #[test]
    fn test_truncated_entry_is_corrupt() {
        let bytes = encode_entry(&sample()).unwrap();
        let err = decode_entry("x", &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            decode_entry("x", b"not an entry"),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            decode_entry("x", b"{\"id\":1}\npayload"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_entry_id_orders_by_creation() {
        let older = sample();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let newer = sample();
        let a = EntryId::for_transmission(&older, 7);
        let b = EntryId::for_transmission(&newer, 1);
        assert!(a < b);
    }

    #[test]
    fn test_entry_id_from_file_name() {
        let id = EntryId::for_transmission(&sample(), 3);
        assert_eq!(EntryId::from_file_name(&id.file_name()), Some(id.clone()));
        assert_eq!(EntryId::from_file_name(&id.temp_file_name()), None);
        assert_eq!(EntryId::from_file_name("notes.trn"), None);
        assert_eq!(EntryId::from_file_name("0000000000000001-000001-nope.trn"), None);
    }
}
