//! Architectural Enforcement
//!
//! Source scanner behind the integration tests in `tests/`. It enforces the
//! async discipline of the switchyard crates:
//! - No `std::thread::sleep` in production code
//! - `tokio::time::sleep` only for backoff delays
//! - No blocking file, network, process or HTTP I/O inside async code
//!
//! The scanner is line-based. It tracks brace depth to know whether a line
//! sits inside an `async fn` or `async` block, and treats everything after a
//! `#[cfg(test)]` attribute as test code.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Lines scanned above a `tokio::time::sleep` for backoff vocabulary
const BACKOFF_CONTEXT_LINES: usize = 15;

/// Kind of violation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    /// Thread-blocking sleep
    BlockingSleep,
    /// Async sleep outside a backoff
    PollingSleep,
    /// Blocking I/O inside async code
    BlockingIo,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockingSleep => write!(f, "blocking sleep"),
            Self::PollingSleep => write!(f, "sleep outside backoff"),
            Self::BlockingIo => write!(f, "blocking I/O in async code"),
        }
    }
}

/// One offending line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was violated
    pub rule: Rule,
    /// The trimmed source line
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Calls that block the executor thread when made from async code
const BLOCKING_IO_PATTERNS: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::process::Command",
    "reqwest::blocking",
    "std::io::stdin()",
    "std::io::stdout()",
];

// =============================================================================
// Line Scanner
// =============================================================================

/// Brace frame: `Some(is_async)` for fn bodies and async blocks, `None` for
/// plain blocks that inherit from their parent
type Frame = Option<bool>;

#[derive(Default)]
struct ScopeTracker {
    frames: Vec<Frame>,
    /// A fn signature has been seen and its body has not opened yet
    pending_fn: Option<bool>,
}

impl ScopeTracker {
    fn in_async(&self) -> bool {
        self.frames.iter().rev().find_map(|f| *f).unwrap_or(false)
    }

    /// Advance over one line of code (comments and string contents removed)
    fn feed(&mut self, code: &str) {
        if let Some(is_async) = fn_declaration(code) {
            self.pending_fn = Some(is_async);
        }

        for (i, c) in code.char_indices() {
            match c {
                '{' => {
                    let frame = if let Some(is_async) = self.pending_fn.take() {
                        Some(is_async)
                    } else if opens_async_block(&code[..i]) {
                        Some(true)
                    } else {
                        None
                    };
                    self.frames.push(frame);
                }
                '}' => {
                    self.frames.pop();
                }
                ';' => {
                    // Bodiless trait method
                    self.pending_fn = None;
                }
                _ => {}
            }
        }
    }
}

/// `Some(is_async)` if the line declares a fn
fn fn_declaration(code: &str) -> Option<bool> {
    let bytes = code.as_bytes();
    let mut search = 0;
    while let Some(pos) = code[search..].find("fn ") {
        let at = search + pos;
        let boundary = at == 0 || !(bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
        let named = code[at + 3..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_');
        if boundary && named {
            return Some(code[..at].trim_end().ends_with("async"));
        }
        search = at + 3;
    }
    None
}

fn opens_async_block(before_brace: &str) -> bool {
    let trimmed = before_brace.trim_end();
    trimmed.ends_with("async") || trimmed.ends_with("async move")
}

/// Strip comments and blank out string literal contents
fn code_only(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => {
                    in_string = false;
                    out.push('"');
                }
                _ => {}
            }
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'/') => break,
            '"' => {
                in_string = true;
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_backoff_context(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(BACKOFF_CONTEXT_LINES);
    lines[start..=idx].iter().any(|l| {
        let l = l.to_lowercase();
        l.contains("backoff") || l.contains("next_delay")
    })
}

// =============================================================================
// Public API
// =============================================================================

/// Scan one source file's text
#[must_use]
pub fn scan_source(path: &Path, source: &str) -> Vec<Violation> {
    let lines: Vec<&str> = source.lines().collect();
    let mut scope = ScopeTracker::default();
    let mut violations = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        if raw.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        let code = code_only(raw);
        let async_before = scope.in_async();
        scope.feed(&code);
        let in_async = async_before || scope.in_async();

        let mut report = |rule| {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule,
                text: raw.trim().to_string(),
            });
        };

        if code.contains("thread::sleep(") {
            report(Rule::BlockingSleep);
        } else if code.contains("time::sleep(") && !is_backoff_context(&lines, idx) {
            report(Rule::PollingSleep);
        }

        if in_async && BLOCKING_IO_PATTERNS.iter().any(|p| code.contains(p)) {
            report(Rule::BlockingIo);
        }
    }

    violations
}

/// Scan every `.rs` file under `dir`
///
/// # Errors
///
/// Returns an error if a file cannot be read.
pub fn scan_directory(dir: &Path) -> std::io::Result<Vec<Violation>> {
    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            let source = fs::read_to_string(path)?;
            violations.extend(scan_source(path, &source));
        }
    }
    Ok(violations)
}

/// Production source directories of the workspace
#[must_use]
pub fn production_dirs() -> Vec<PathBuf> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    vec![
        root.join("switchyard/core/src"),
        root.join("switchyard/daemon/src"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str) -> Vec<Rule> {
        scan_source(Path::new("sample.rs"), src)
            .into_iter()
            .map(|v| v.rule)
            .collect()
    }

    #[test]
    fn test_thread_sleep_flagged_anywhere() {
        let src = "fn wait() {\n    std::thread::sleep(Duration::from_millis(5));\n}\n";
        assert_eq!(scan(src), vec![Rule::BlockingSleep]);
    }

    #[test]
    fn test_backoff_sleep_allowed() {
        let src = "async fn run() {\n    let delay = backoff.next_delay();\n    tokio::time::sleep(delay).await;\n}\n";
        assert!(scan(src).is_empty());
    }

    #[test]
    fn test_polling_sleep_flagged() {
        let src = "async fn run() {\n    loop {\n        tokio::time::sleep(Duration::from_millis(100)).await;\n    }\n}\n";
        assert_eq!(scan(src), vec![Rule::PollingSleep]);
    }

    #[test]
    fn test_blocking_io_only_in_async() {
        let sync = "fn load() -> String {\n    std::fs::read_to_string(\"a\").unwrap_or_default()\n}\n";
        assert!(scan(sync).is_empty());

        let asynchronous = "async fn load() -> String {\n    std::fs::read_to_string(\"a\").unwrap_or_default()\n}\n";
        assert_eq!(scan(asynchronous), vec![Rule::BlockingIo]);
    }

    #[test]
    fn test_async_block_inside_sync_fn() {
        let src = "fn spawn() {\n    tokio::spawn(async move {\n        let _ = std::fs::read(\"x\");\n    });\n    let _ = std::fs::read(\"y\");\n}\n";
        let violations = scan_source(Path::new("s.rs"), src);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 3);
    }

    #[test]
    fn test_sync_fn_after_async_fn() {
        let src = "async fn a() {\n    work().await;\n}\n\nfn b() {\n    let _ = std::fs::read(\"x\");\n}\n";
        assert!(scan(src).is_empty());
    }

    #[test]
    fn test_where_clause_and_trait_methods() {
        let src = concat!(
            "trait T {\n",
            "    async fn go(&self);\n",
            "    fn name(&self) -> &str;\n",
            "}\n",
            "pub async fn run<F>(f: F)\n",
            "where\n",
            "    F: Fn(&str) -> Option<String>,\n",
            "{\n",
            "    let _ = std::fs::read(\"x\");\n",
            "}\n",
        );
        assert_eq!(scan(src), vec![Rule::BlockingIo]);
    }

    #[test]
    fn test_comments_strings_and_tests_ignored() {
        let src = concat!(
            "async fn a() {\n",
            "    // std::thread::sleep(x)\n",
            "    let s = \"std::fs::read {\";\n",
            "}\n",
            "#[cfg(test)]\n",
            "mod tests {\n",
            "    async fn t() { std::thread::sleep(d); }\n",
            "}\n",
        );
        assert!(scan(src).is_empty());
    }

    #[test]
    fn test_fn_pointer_types_are_not_declarations() {
        assert_eq!(fn_declaration("let f: fn(&str) -> bool = check;"), None);
        assert_eq!(fn_declaration("    pub async fn run(&self) {"), Some(true));
        assert_eq!(fn_declaration("fn main() {"), Some(false));
        assert_eq!(fn_declaration("let defn = 1;"), None);
    }
}
