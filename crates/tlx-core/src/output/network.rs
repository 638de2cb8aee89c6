//! HTTP output.

use std::time::Duration;

use chrono::Utc;
use tlx_common::Transmission;
use tracing::debug;

use super::{AttemptReport, TransmissionOutput};
use crate::policy::response::parse_retry_after;

/// POSTs transmissions to the ingestion endpoint.
pub struct HttpOutput {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpOutput {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(concat!("tlx/", env!("CARGO_PKG_VERSION")))
            .build();
        HttpOutput {
            agent,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl TransmissionOutput for HttpOutput {
    fn send(&self, transmission: &Transmission) -> AttemptReport {
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", transmission.content_type())
            .set("Content-Encoding", transmission.content_encoding())
            .send_bytes(transmission.content());

        let report = match result {
            Ok(response) => {
                let status = response.status();
                let mut report = AttemptReport::status(status);
                // always drain so the connection can be reused
                let body = response.into_string().ok();
                if status == 206 {
                    report.body = body;
                }
                report
            }
            Err(ureq::Error::Status(status, response)) => {
                let mut report = AttemptReport::status(status);
                report.retry_after = response
                    .header("Retry-After")
                    .and_then(|v| parse_retry_after(v, Utc::now()));
                report.body = response.into_string().ok();
                report
            }
            Err(ureq::Error::Transport(transport)) => AttemptReport::failed(transport.to_string()),
        };

        debug!(
            transmission_id = %transmission.id().short(),
            bytes = transmission.len(),
            status = ?report.status,
            error = ?report.error,
            "network attempt finished"
        );
        report
    }
}
