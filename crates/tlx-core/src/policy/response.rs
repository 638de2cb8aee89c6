//! Ingestion endpoint response bodies and headers.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Per-item status codes worth sending again.
pub const RETRYABLE_ITEM_CODES: [u16; 5] = [408, 429, 439, 500, 503];

/// Body of a partial-acceptance (206) response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    pub items_received: usize,
    pub items_accepted: usize,
    #[serde(default)]
    pub errors: Vec<ItemError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub index: usize,
    pub status_code: u16,
    #[serde(default)]
    pub message: Option<String>,
}

impl BackendResponse {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    pub fn fully_accepted(&self) -> bool {
        self.items_accepted >= self.items_received
    }

    /// Indexes of items that may be retried, ascending, each once, and
    /// limited to `total` items actually sent.
    pub fn retryable_indexes(&self, total: usize) -> Vec<usize> {
        self.errors
            .iter()
            .filter(|e| e.index < total && is_retryable_item(e.status_code))
            .map(|e| e.index)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

pub fn is_retryable_item(status: u16) -> bool {
    RETRYABLE_ITEM_CODES.contains(&status)
}

/// Longest suspension a `Retry-After` header can request.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse a `Retry-After` header: delta seconds or an HTTP-date.
/// A date in the past yields zero; anything beyond [`MAX_RETRY_AFTER`] is
/// clamped to it.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    let wait = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            let at = DateTime::parse_from_rfc2822(value).ok()?;
            let delta = at.with_timezone(&Utc) - now;
            delta.to_std().unwrap_or(Duration::ZERO)
        }
    };
    Some(wait.min(MAX_RETRY_AFTER))
}
