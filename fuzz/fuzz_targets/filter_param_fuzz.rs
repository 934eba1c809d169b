//! Fuzz the `field[:op]:value` and `field[:order]` parameter grammar.
//!
//! Run with: cargo +nightly fuzz run filter_param_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use prov_core::params::parse_raw_filter;
use prov_core::{FileOpsParams, FileStateParams};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(raw) = parse_raw_filter(input) {
        assert!(!raw.field.is_empty(), "parsed filter must name a field");
        assert!(input.contains(raw.field.as_str()));
    }

    // Resolution may reject anything, but never panic.
    if let Ok(params) = FileOpsParams::new().with_filter_params([input]) {
        let _ = params.search_request(10);
    }
    if let Ok(params) = FileStateParams::new().with_filter_params([input]) {
        let _ = params.search_request(10);
    }
    let _ = FileOpsParams::new().with_sort_param(input);
    let _ = FileStateParams::new().with_xattr_sort_param(input);
    let _ = FileStateParams::new().with_app_state_params([input]);
});
