//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural
//! principles on the production sources of the styx crates:
//! - No thread sleeps (the dial backoff uses `tokio::time::sleep`)
//! - No panicking shortcuts in the core library
//! - Only the daemon ends the process
//!
//! These tests are designed to catch violations early in the development
//! cycle. They scan source text, so they are deliberately simple.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the pattern was found in
    pub path: PathBuf,
    /// One-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Whether a line opens the test-only part of a file
///
/// Test modules sit at the end of each file, so everything from the first
/// `#[cfg(test)]` (or `#[cfg(all(test, ...))]`) on is test code.
#[must_use]
pub fn starts_test_code(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("#[cfg(") && line.contains("test")
}

/// The code part of a line, with any `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Scan the production part of every `.rs` file under `dir`
///
/// `dir` is relative to the workspace root. Lines are checked with comments
/// stripped; files stop being scanned at their test module.
pub fn scan_production(dir: &str, forbidden: impl Fn(&str) -> bool) -> Vec<Violation> {
    let root = workspace_root().join(dir);
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
    {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };

        for (idx, line) in content.lines().enumerate() {
            if starts_test_code(line) {
                break;
            }
            if forbidden(code_part(line)) {
                violations.push(Violation {
                    path: entry.path().to_path_buf(),
                    line: idx + 1,
                    text: line.trim().to_string(),
                });
            }
        }
    }

    violations
}

/// Panic with a readable report if there are any violations
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // x.unwrap()"), "let x = 1; ");
        assert_eq!(code_part("/// doc .unwrap()"), "");
    }

    #[test]
    fn test_starts_test_code() {
        assert!(starts_test_code("#[cfg(test)]"));
        assert!(starts_test_code("    #[cfg(all(test, unix))]"));
        assert!(!starts_test_code("#[cfg(unix)]"));
    }

    #[test]
    fn test_workspace_root_has_core_crate() {
        assert!(workspace_root().join("styx").join("core").join("Cargo.toml").exists());
    }
}
