//! Fuzz target for overflow store entry decoding.
//!
//! A damaged entry file must come back as an error, never a panic, and a
//! decoded payload must match the header's declared length.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tlx_store::decode_entry;

fuzz_target!(|data: &[u8]| {
    if let Ok(transmission) = decode_entry("fuzz", data) {
        assert!(transmission.len() <= data.len());
    }
});
