//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No sleeping outside the session timer table
//! - No blocking I/O in async code
//! - Engine layers never reach up into transports or negotiation
//!
//! Scans are line based. Everything from the first `#[cfg(test)]` in a file
//! onward counts as test code and is skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Path relative to the scanned root
    pub file: String,
    /// 1-based line number
    pub line: usize,
    /// The trimmed source line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.file, self.line, self.text)
    }
}

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Source directory of the core engine crate
pub fn core_src() -> PathBuf {
    workspace_root().join("answerflow").join("core").join("src")
}

/// Source directory of the command-line crate
pub fn cli_src() -> PathBuf {
    workspace_root().join("answerflow").join("cli").join("src")
}

/// Production lines of a source file with their 1-based numbers
///
/// Line comments are stripped; the file is cut at its first test module.
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        out.push((idx + 1, code.to_string()));
    }
    out
}

/// Scan every `.rs` file under `root`
///
/// `check` sees the path relative to `root` (with `/` separators) and one
/// production line, and returns true when the line violates the rule.
pub fn scan<F>(root: &Path, check: F) -> Vec<Violation>
where
    F: Fn(&str, &str) -> bool,
{
    let mut violations = Vec::new();
    if !root.exists() {
        return violations;
    }

    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
    {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        for (line, code) in production_lines(&content) {
            if check(&relative, &code) {
                violations.push(Violation {
                    file: relative.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Panic with a readable report when `violations` is not empty
pub fn assert_clean(rule: &str, violations: &[Violation]) {
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
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// sleep(here)\nlet x = 1; // sleep(\n#[cfg(test)]\nmod tests {}\n";
        let lines = production_lines(source);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (1, "fn a() {}".to_string()));
        assert_eq!(lines[1], (3, "let x = 1; ".to_string()));
    }

    #[test]
    fn test_core_sources_are_found() {
        assert!(core_src().join("lib.rs").exists());
    }
}
