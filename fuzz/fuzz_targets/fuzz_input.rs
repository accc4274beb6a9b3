//! Fuzz testing for client-controlled input handling.
//!
//! Query strings and JSON bodies both come straight from the client, so the
//! parser and the sanitizer must never panic. The sanitizer must also be
//! stable: a second pass over its own output changes nothing.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the input fuzz target
//! cargo +nightly fuzz run fuzz_input
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_input -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use resource_gateway::middleware::sanitize::{sanitize_str, sanitize_value};
use resource_gateway::query::parse_query;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    // Query strings: parse, then sanitize the structured result.
    let mut query = Value::Object(parse_query(s));
    sanitize_value(&mut query);
    let once = query.clone();
    assert!(sanitize_value(&mut query).is_empty());
    assert_eq!(query, once);

    let escaped = sanitize_str(s);
    assert!(!escaped.contains(['<', '>']));
    assert_eq!(sanitize_str(&escaped), escaped);

    // JSON bodies.
    if let Ok(mut body) = serde_json::from_str::<Value>(s) {
        sanitize_value(&mut body);
        let once = body.clone();
        assert!(sanitize_value(&mut body).is_empty());
        assert_eq!(body, once);
    }
});
