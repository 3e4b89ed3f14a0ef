//! Integration Test: Thread Sleep Prohibition
//!
//! **Policy**: Production code runs on the tokio runtime and MUST NOT block a
//! worker thread with `std::thread::sleep`. Backoffs use
//! `tokio::time::sleep(...).await`.

use architectural_enforcement::{report, scan_production};

fn is_thread_sleep(code: &str) -> bool {
    code.contains("thread::sleep")
}

#[test]
fn test_no_thread_sleep_in_core() {
    report(
        "std::thread::sleep in styx-core",
        &scan_production("styx/core/src", is_thread_sleep),
    );
}

#[test]
fn test_no_thread_sleep_in_daemon() {
    report(
        "std::thread::sleep in styx-daemon",
        &scan_production("styx/daemon/src", is_thread_sleep),
    );
}

#[test]
fn test_detector_matches_both_spellings() {
    assert!(is_thread_sleep("std::thread::sleep(d);"));
    assert!(is_thread_sleep("thread::sleep(d);"));
    assert!(!is_thread_sleep("tokio::time::sleep(d).await;"));
}
