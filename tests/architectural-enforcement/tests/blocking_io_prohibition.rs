//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Engine code uses `tokio::fs`, `tokio::net` and async `reqwest`.
//! **Exceptions**: `config/` reads its file before any runtime work starts.

use architectural_enforcement::{assert_clean, core_src, scan};

#[test]
fn test_no_blocking_fs_outside_config() {
    let violations = scan(&core_src(), |file, code| {
        !file.starts_with("config/") && (code.contains("std::fs") || code.contains("File::open("))
    });
    assert_clean("Blocking file I/O outside config loading", &violations);
}

#[test]
fn test_no_blocking_network_io() {
    let violations = scan(&core_src(), |_, code| {
        code.contains("std::net::TcpStream")
            || code.contains("std::net::TcpListener")
            || code.contains("reqwest::blocking")
    });
    assert_clean("Blocking network I/O", &violations);
}

#[test]
fn test_no_blocking_process_spawn() {
    let violations = scan(&core_src(), |_, code| code.contains("std::process::Command"));
    assert_clean("Blocking process spawn", &violations);
}
