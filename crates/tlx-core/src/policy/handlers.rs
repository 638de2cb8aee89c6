//! The handler chain.
//!
//! Each handler is a plain function from one attempt's outcome to an
//! optional decision. The manager asks them in order and applies the first
//! decision it gets.

use tlx_common::Transmission;
use tracing::{debug, warn};

use super::response::BackendResponse;
use super::{Action, Decision, Transition};
use crate::output::AttemptReport;
use crate::serializer::{decode_lines, encode_lines};

/// Everything a handler may look at besides the report.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub transmission: &'a Transmission,
    /// Attempts made so far, including the one being reported.
    pub attempts: u32,
    pub max_instant_retries: u32,
}

impl AttemptContext<'_> {
    fn has_retry_budget(&self) -> bool {
        self.attempts <= self.max_instant_retries
    }
}

pub type Handler = fn(&AttemptReport, &AttemptContext<'_>) -> Option<Decision>;

/// Handlers in the order they are consulted.
pub const DEFAULT_CHAIN: [Handler; 5] = [
    accepted_handler,
    throttling_handler,
    partial_acceptance_handler,
    permanent_rejection_handler,
    transient_error_handler,
];

/// Status codes meaning "slow down".
pub const THROTTLING_CODES: [u16; 2] = [429, 439];

/// Status codes meaning the payload itself will never be accepted.
pub const PERMANENT_REJECTION_CODES: [u16; 2] = [400, 413];

pub const PARTIAL_CONTENT: u16 = 206;

/// Any 2xx other than 206: done, and the endpoint is healthy.
pub fn accepted_handler(report: &AttemptReport, _ctx: &AttemptContext<'_>) -> Option<Decision> {
    match report.status {
        Some(code) if (200..300).contains(&code) && code != PARTIAL_CONTENT => {
            Some(Decision::new(Action::Complete).with_transition(Transition::Reset))
        }
        _ => None,
    }
}

/// 429/439 with a usable `Retry-After`: suspend the network for exactly
/// that long and keep the payload on disk meanwhile.
pub fn throttling_handler(report: &AttemptReport, _ctx: &AttemptContext<'_>) -> Option<Decision> {
    let code = report.status?;
    if !THROTTLING_CODES.contains(&code) {
        return None;
    }
    let resume_after = report.retry_after.filter(|d| !d.is_zero())?;
    Some(Decision::new(Action::Persist).with_transition(Transition::Throttle(resume_after)))
}

/// 206: retry the items the server reported as transient, drop the rest.
///
/// Retryable items are re-batched in their original order.
pub fn partial_acceptance_handler(
    report: &AttemptReport,
    ctx: &AttemptContext<'_>,
) -> Option<Decision> {
    if report.status != Some(PARTIAL_CONTENT) {
        return None;
    }
    let id = ctx.transmission.id().short();

    let Some(response) = report.body.as_deref().and_then(BackendResponse::parse) else {
        warn!(transmission_id = %id, "partial acceptance without a readable body, treating as delivered");
        return Some(Decision::new(Action::Complete));
    };
    if response.fully_accepted() {
        return Some(Decision::new(Action::Complete).with_transition(Transition::Reset));
    }

    let lines = match decode_lines(ctx.transmission) {
        Ok(lines) => lines,
        Err(e) => {
            warn!(transmission_id = %id, error = %e, "cannot decode payload for partial retry");
            return Some(Decision::new(Action::Complete));
        }
    };
    if lines.len() != response.items_received {
        debug!(
            transmission_id = %id,
            sent = lines.len(),
            received = response.items_received,
            "item count mismatch, skipping partial retry"
        );
        return Some(Decision::new(Action::Complete));
    }

    let retry: Vec<&str> = response
        .retryable_indexes(lines.len())
        .into_iter()
        .map(|i| lines[i].as_str())
        .collect();
    let rejected = response
        .items_received
        .saturating_sub(response.items_accepted)
        .saturating_sub(retry.len());
    if rejected > 0 {
        warn!(
            transmission_id = %id,
            rejected,
            "endpoint permanently rejected records, dropping them"
        );
    }
    if retry.is_empty() {
        return Some(Decision::new(Action::Complete));
    }

    let subset = match encode_lines(&retry) {
        Ok(t) => t,
        Err(e) => {
            warn!(transmission_id = %id, error = %e, records = retry.len(), "failed to re-batch retryable records, dropping them");
            return Some(Decision::new(Action::Complete));
        }
    };
    debug!(
        transmission_id = %id,
        new_transmission_id = %subset.id().short(),
        records = retry.len(),
        "re-batching retryable records"
    );
    if ctx.has_retry_budget() {
        Some(Decision::new(Action::Resubmit(subset)))
    } else {
        Some(Decision::new(Action::Divert(subset)))
    }
}

/// 400/413: the payload will never be accepted.
pub fn permanent_rejection_handler(
    report: &AttemptReport,
    _ctx: &AttemptContext<'_>,
) -> Option<Decision> {
    let code = report.status?;
    if !PERMANENT_REJECTION_CODES.contains(&code) {
        return None;
    }
    Some(Decision::new(Action::Drop {
        reason: format!("endpoint rejected payload with status {code}"),
    }))
}

/// Everything else: connection failures, 5xx, unexpected statuses.
/// Retry immediately while budget remains, then back off and persist.
pub fn transient_error_handler(
    report: &AttemptReport,
    ctx: &AttemptContext<'_>,
) -> Option<Decision> {
    if report.is_success() {
        return None;
    }
    if ctx.has_retry_budget() {
        Some(Decision::new(Action::RetryNow))
    } else {
        Some(Decision::new(Action::Persist).with_transition(Transition::Backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::serializer::GzipSerializer;
    use crate::serializer::TelemetrySerializer;
    use tlx_common::{CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP};

    fn payload(n: usize) -> Transmission {
        let batch: Vec<serde_json::Value> = (0..n).map(|i| serde_json::json!({"i": i})).collect();
        GzipSerializer.serialize(&batch).unwrap()
    }

    fn ctx(t: &Transmission, attempts: u32) -> AttemptContext<'_> {
        AttemptContext {
            transmission: t,
            attempts,
            max_instant_retries: 3,
        }
    }

    fn throttle_duration(decision: &Decision) -> Option<Duration> {
        match decision.transition {
            Some(Transition::Throttle(d)) => Some(d),
            _ => None,
        }
    }

    fn run_chain(report: &AttemptReport, ctx: &AttemptContext<'_>) -> Decision {
        DEFAULT_CHAIN
            .iter()
            .find_map(|h| h(report, ctx))
            .unwrap()
    }

    #[test]
    fn test_success_resets() {
        let t = payload(1);
        let d = run_chain(&AttemptReport::status(200), &ctx(&t, 1));
        assert_eq!(d.action, Action::Complete);
        assert_eq!(d.transition, Some(Transition::Reset));

        let d = run_chain(&AttemptReport::status(204), &ctx(&t, 1));
        assert_eq!(d.transition, Some(Transition::Reset));
    }

    #[test]
    fn test_throttle_uses_retry_after() {
        let t = payload(1);
        let report = AttemptReport::status(429).with_retry_after(Duration::from_secs(30));
        let d = run_chain(&report, &ctx(&t, 1));
        assert_eq!(d.action, Action::Persist);
        assert_eq!(throttle_duration(&d), Some(Duration::from_secs(30)));

        let report = AttemptReport::status(439).with_retry_after(Duration::from_secs(5));
        assert_eq!(
            throttle_duration(&run_chain(&report, &ctx(&t, 1))),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_throttle_without_retry_after_is_transient() {
        let t = payload(1);
        let d = run_chain(&AttemptReport::status(429), &ctx(&t, 1));
        assert_eq!(d.action, Action::RetryNow);

        let zero = AttemptReport::status(429).with_retry_after(Duration::ZERO);
        assert_eq!(run_chain(&zero, &ctx(&t, 1)).action, Action::RetryNow);
    }

    #[test]
    fn test_transient_retries_then_backs_off() {
        let t = payload(1);
        for attempts in 1..=3 {
            let d = run_chain(&AttemptReport::status(503), &ctx(&t, attempts));
            assert_eq!(d.action, Action::RetryNow);
            assert_eq!(d.transition, None);
        }
        let d = run_chain(&AttemptReport::status(503), &ctx(&t, 4));
        assert_eq!(d.action, Action::Persist);
        assert_eq!(d.transition, Some(Transition::Backoff));

        let d = run_chain(&AttemptReport::failed("connection refused"), &ctx(&t, 4));
        assert_eq!(d.transition, Some(Transition::Backoff));
    }

    #[test]
    fn test_zero_retry_budget_backs_off_immediately() {
        let t = payload(1);
        let c = AttemptContext {
            transmission: &t,
            attempts: 1,
            max_instant_retries: 0,
        };
        let d = run_chain(&AttemptReport::failed("timeout"), &c);
        assert_eq!(d.action, Action::Persist);
    }

    #[test]
    fn test_permanent_rejection_drops() {
        let t = payload(1);
        for code in [400, 413] {
            let d = run_chain(&AttemptReport::status(code), &ctx(&t, 1));
            assert!(matches!(d.action, Action::Drop { .. }));
            assert_eq!(d.transition, None);
        }
    }

    #[test]
    fn test_partial_resubmits_retryable_in_order() {
        let t = payload(5);
        let body = r#"{"itemsReceived":5,"itemsAccepted":1,"errors":[
            {"index":4,"statusCode":503},
            {"index":1,"statusCode":400,"message":"invalid"},
            {"index":2,"statusCode":500},
            {"index":3,"statusCode":408},
            {"index":2,"statusCode":500}
        ]}"#;
        let report = AttemptReport::status(206).with_body(body);
        let d = run_chain(&report, &ctx(&t, 1));

        let subset = match d.action {
            Action::Resubmit(subset) => subset,
            other => panic!("expected resubmit, got {other:?}"),
        };
        let lines = decode_lines(&subset).unwrap();
        assert_eq!(lines, vec![r#"{"i":2}"#, r#"{"i":3}"#, r#"{"i":4}"#]);
        assert_eq!(d.transition, None);
    }

    #[test]
    fn test_partial_out_of_budget_diverts() {
        let t = payload(2);
        let body = r#"{"itemsReceived":2,"itemsAccepted":1,"errors":[{"index":0,"statusCode":500}]}"#;
        let report = AttemptReport::status(206).with_body(body);
        let d = run_chain(&report, &ctx(&t, 4));
        assert!(matches!(d.action, Action::Divert(_)));
    }

    #[test]
    fn test_partial_only_permanent_errors_completes() {
        let t = payload(2);
        let body = r#"{"itemsReceived":2,"itemsAccepted":1,"errors":[{"index":0,"statusCode":400}]}"#;
        let d = run_chain(&AttemptReport::status(206).with_body(body), &ctx(&t, 1));
        assert_eq!(d.action, Action::Complete);
    }

    #[test]
    fn test_partial_count_mismatch_completes() {
        let t = payload(2);
        let body = r#"{"itemsReceived":7,"itemsAccepted":1,"errors":[{"index":0,"statusCode":500}]}"#;
        let d = run_chain(&AttemptReport::status(206).with_body(body), &ctx(&t, 1));
        assert_eq!(d.action, Action::Complete);
    }

    #[test]
    fn test_partial_fully_accepted_resets() {
        let t = payload(3);
        let body = r#"{"itemsReceived":3,"itemsAccepted":3,"errors":[]}"#;
        let d = run_chain(&AttemptReport::status(206).with_body(body), &ctx(&t, 1));
        assert_eq!(d.action, Action::Complete);
        assert_eq!(d.transition, Some(Transition::Reset));
    }

    #[test]
    fn test_partial_unreadable_body_completes() {
        let t = Transmission::new(vec![0; 4], CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP);
        let d = run_chain(&AttemptReport::status(206).with_body("nope"), &ctx(&t, 1));
        assert_eq!(d.action, Action::Complete);
    }
}
