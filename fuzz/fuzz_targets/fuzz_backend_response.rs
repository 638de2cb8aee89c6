//! Fuzz target for partial-acceptance bodies and Retry-After values.

#![no_main]

use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use tlx_core::policy::response::{parse_retry_after, BackendResponse};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(response) = BackendResponse::parse(text) {
        for total in [0usize, 1, 500] {
            let indexes = response.retryable_indexes(total);
            assert!(indexes.iter().all(|&i| i < total));
            assert!(indexes.windows(2).all(|w| w[0] < w[1]));
        }
    }

    if let Some(now) = Utc.timestamp_opt(1_700_000_000, 0).single() {
        let _ = parse_retry_after(text, now);
    }
});
