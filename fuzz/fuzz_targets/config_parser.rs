#![no_main]

use libfuzzer_sys::fuzz_target;
use phenostat::config::StatsConfig;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    // Parsing and validation must reject bad input without panicking
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = StatsConfig::from_toml_str(input, Path::new("/fuzz"));
    }
});
