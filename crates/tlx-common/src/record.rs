//! Telemetry records.
//!
//! A record is one structured event or metric emitted by instrumented code.
//! It is built once (name, timestamp, property bag) and then moved into the
//! exporter, which owns it until serialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One telemetry item.
///
/// Fields are private; a record cannot be changed after it leaves the
/// builder methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    name: String,
    time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, Value>,
}

impl TelemetryRecord {
    /// Create a record stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self::at(name, Utc::now())
    }

    /// Create a record with an explicit timestamp.
    pub fn at(name: impl Into<String>, time: DateTime<Utc>) -> Self {
        TelemetryRecord {
            name: name.into(),
            time,
            properties: BTreeMap::new(),
        }
    }

    /// Attach a property. Values that fail to convert to JSON are skipped.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.properties.insert(key.into(), v);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}
