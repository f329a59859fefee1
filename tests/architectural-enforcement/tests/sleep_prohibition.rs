//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in switchyard-core and switchyard-daemon MUST
//! NOT block a thread with `std::thread::sleep`, and MUST NOT poll with
//! `tokio::time::sleep`. Waiting happens on `Notify`, channels or `select!`.
//! **Exceptions**: the dispatch loop's exponential backoff, test code.

use architectural_enforcement::{production_dirs, scan_directory, Rule};

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();
    for dir in production_dirs() {
        assert!(dir.exists(), "missing source directory {}", dir.display());
        violations.extend(
            scan_directory(&dir)
                .unwrap()
                .into_iter()
                .filter(|v| matches!(v.rule, Rule::BlockingSleep | Rule::PollingSleep)),
        );
    }

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nACCEPTABLE: tokio::time::sleep for a backoff delay, test code");
        eprintln!("FORBIDDEN: std::thread::sleep, sleep in polling loops, sleep as synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
