//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in switchyard-core and switchyard-daemon MUST NOT use
//! blocking I/O. Use `tokio::io`, `tokio::fs` and the async `reqwest` client.
//! Synchronous functions (config loading before the runtime does real work,
//! CLI parsing) may block.

use architectural_enforcement::{production_dirs, scan_directory, Rule};

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();
    for dir in production_dirs() {
        assert!(dir.exists(), "missing source directory {}", dir.display());
        violations.extend(
            scan_directory(&dir)
                .unwrap()
                .into_iter()
                .filter(|v| v.rule == Rule::BlockingIo),
        );
    }

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nFORBIDDEN in async: std::fs, std::net, std::process::Command,");
        eprintln!("reqwest::blocking, std::io::stdin()/stdout()");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}
