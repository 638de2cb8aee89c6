//! Batch serialization.
//!
//! A batch becomes newline-delimited JSON, gzip-compressed as one stream.
//! Records that fail to render are skipped; the rest of the batch goes out.

use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tlx_common::{Transmission, CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP};
use tracing::{error, warn};

/// Turns a batch into one wire payload.
pub trait TelemetrySerializer<T>: Send + Sync {
    /// `None` when no record in the batch could be rendered.
    fn serialize(&self, batch: &[T]) -> Option<Transmission>;
}

/// JSON-lines + gzip serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipSerializer;

impl<T: Serialize> TelemetrySerializer<T> for GzipSerializer {
    fn serialize(&self, batch: &[T]) -> Option<Transmission> {
        let mut lines = Vec::with_capacity(batch.len());
        for (index, item) in batch.iter().enumerate() {
            match serde_json::to_string(item) {
                Ok(line) => lines.push(line),
                Err(e) => warn!(index, error = %e, "skipping record that failed to serialize"),
            }
        }
        if lines.is_empty() {
            return None;
        }

        match encode_lines(&lines) {
            Ok(t) => Some(t),
            Err(e) => {
                error!(error = %e, records = lines.len(), "failed to compress batch");
                None
            }
        }
    }
}

/// Join pre-rendered lines and gzip them into a transmission.
pub fn encode_lines<S: AsRef<str>>(lines: &[S]) -> io::Result<Transmission> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            encoder.write_all(b"\n")?;
        }
        encoder.write_all(line.as_ref().as_bytes())?;
    }
    let content = encoder.finish()?;
    Ok(Transmission::new(
        content,
        CONTENT_TYPE_JSON_STREAM,
        ENCODING_GZIP,
    ))
}

/// Split a transmission back into its record lines.
pub fn decode_lines(transmission: &Transmission) -> io::Result<Vec<String>> {
    let reader: Box<dyn Read + '_> = if transmission.is_gzip() {
        Box::new(GzDecoder::new(transmission.content()))
    } else {
        Box::new(transmission.content())
    };
    BufReader::new(reader)
        .lines()
        .map(|line| line.map(|l| l.trim_end_matches('\r').to_string()))
        .collect()
}
