//! Integration Test: Panic-Free Core
//!
//! **Policy**: The core library propagates errors with `?` and typed error
//! enums. A failed session must never take an accept loop down with it, so
//! production code in `styx-core` MUST NOT use `.unwrap()` or `.expect(..)`,
//! and MUST NOT end the process; only the daemon decides the exit status.

use architectural_enforcement::{report, scan_production};

fn is_panicking_shortcut(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

fn is_process_exit(code: &str) -> bool {
    code.contains("process::exit") || code.contains("process::abort")
}

#[test]
fn test_no_unwrap_or_expect_in_core() {
    report(
        ".unwrap()/.expect() in styx-core production code",
        &scan_production("styx/core/src", is_panicking_shortcut),
    );
}

#[test]
fn test_no_process_exit_in_core() {
    report(
        "process exit in styx-core",
        &scan_production("styx/core/src", is_process_exit),
    );
}

#[test]
fn test_detectors() {
    assert!(is_panicking_shortcut("let x = y.unwrap();"));
    assert!(is_panicking_shortcut("y.expect(\"msg\")"));
    assert!(!is_panicking_shortcut("y.unwrap_or_else(f)"));
    assert!(!is_panicking_shortcut("y.unwrap_or_default()"));
    assert!(is_process_exit("std::process::exit(1)"));
}
