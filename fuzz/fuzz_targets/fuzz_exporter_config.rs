//! Fuzz target for exporter configuration parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tlx_config::resolve::parse_config;
use tlx_config::validate;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = parse_config(text) {
        let _ = validate(&config);
    }
});
