//! Enforces the async and error-handling rules on shipped code

use architectural_enforcement::{
    is_blocking_sleep, is_std_process_command, is_unwrap_or_expect, report, scan_production,
};

#[test]
fn no_blocking_sleep_in_production_code() {
    let violations = scan_production(is_blocking_sleep);
    assert!(
        violations.is_empty(),
        "blocking sleep found (use tokio::time::sleep or a timeout):\n{}",
        report(&violations)
    );
}

#[test]
fn no_std_process_command_in_production_code() {
    let violations = scan_production(is_std_process_command);
    assert!(
        violations.is_empty(),
        "std::process::Command found (spawn through tokio::process):\n{}",
        report(&violations)
    );
}

#[test]
fn no_unwrap_or_expect_in_production_code() {
    let violations = scan_production(is_unwrap_or_expect);
    assert!(
        violations.is_empty(),
        "unwrap()/expect() found outside test modules:\n{}",
        report(&violations)
    );
}
