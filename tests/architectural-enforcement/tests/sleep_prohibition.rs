//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Engine code never sleeps to wait for something. Every delay
//! goes through the session timer table so cancellation can abort it.
//! **Exceptions**: `session/timers.rs`, test code.

use architectural_enforcement::{assert_clean, cli_src, core_src, scan};

const TIMER_TABLE: &str = "session/timers.rs";

fn is_sleep(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[test]
fn test_no_sleep_outside_timer_table() {
    let violations = scan(&core_src(), |file, code| file != TIMER_TABLE && is_sleep(code));
    assert_clean("Sleep outside the session timer table", &violations);
}

#[test]
fn test_no_thread_sleep_anywhere() {
    let mut violations = scan(&core_src(), |_, code| code.contains("thread::sleep"));
    violations.extend(scan(&cli_src(), |_, code| code.contains("thread::sleep")));
    assert_clean("Blocking thread sleep", &violations);
}

#[test]
fn test_cli_never_sleeps() {
    let violations = scan(&cli_src(), |_, code| is_sleep(code));
    assert_clean("Sleep in the command-line front end", &violations);
}
