//! Integration Test: Module Layering
//!
//! The session engine, playback, replay cache and data model sit below the
//! transports. They must not import transports, negotiation, the inference
//! kernel or configuration.

use architectural_enforcement::{assert_clean, core_src, scan};

const LOWER_LAYERS: &[&str] = &[
    "session/",
    "cache/",
    "fallback.rs",
    "chunk.rs",
    "snapshot.rs",
    "tokenizer.rs",
    "builder.rs",
    "request.rs",
    "error.rs",
];

const UPPER_LAYERS: &[&str] = &[
    "crate::transport",
    "crate::coordinator",
    "crate::kernel",
    "crate::config",
];

fn is_lower(file: &str) -> bool {
    LOWER_LAYERS.iter().any(|prefix| file.starts_with(prefix))
}

#[test]
fn test_lower_layers_do_not_import_upper_layers() {
    let violations = scan(&core_src(), |file, code| {
        is_lower(file) && UPPER_LAYERS.iter().any(|upper| code.contains(upper))
    });
    assert_clean("Lower layer importing an upper layer", &violations);
}

#[test]
fn test_only_coordinator_builds_sessions_from_transports() {
    let violations = scan(&core_src(), |file, code| {
        file.starts_with("transport/") && code.contains("crate::coordinator")
    });
    assert_clean("Transport depending on the coordinator", &violations);
}
