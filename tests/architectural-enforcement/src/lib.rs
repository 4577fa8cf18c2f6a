//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking sleep in production code
//! - External processes only through `tokio::process`
//! - No `unwrap()` / `expect()` outside test modules
//!
//! These tests are designed to catch violations early in the development cycle.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Production source roots, relative to the workspace root
pub const SOURCE_ROOTS: &[&str] = &["radio/core/src", "radio/daemon/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root, derived from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file under the production source roots
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files: Vec<PathBuf> = SOURCE_ROOTS
        .iter()
        .flat_map(|dir| WalkDir::new(root.join(dir)).into_iter())
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == "rs"))
        .collect();
    files.sort();
    files
}

/// The part of `source` that ships: everything before the first
/// `#[cfg(test)]` (or `#[cfg(all(test` gate)
pub fn production_portion(source: &str) -> &str {
    let cut = ["#[cfg(test)]", "#[cfg(all(test"]
        .iter()
        .filter_map(|marker| source.find(marker))
        .min()
        .unwrap_or(source.len());
    &source[..cut]
}

/// Lines of the production portion matching `is_violation`, skipping comments
pub fn scan_source<F>(path: &Path, source: &str, is_violation: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    production_portion(source)
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("//") && is_violation(trimmed)
        })
        .map(|(idx, line)| Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            text: line.trim().to_string(),
        })
        .collect()
}

/// Scan every production source file
pub fn scan_production<F>(is_violation: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    production_sources()
        .iter()
        .filter_map(|path| {
            std::fs::read_to_string(path)
                .ok()
                .map(|source| scan_source(path, &source, &is_violation))
        })
        .flatten()
        .collect()
}

/// `std::thread::sleep` blocks a runtime worker
pub fn is_blocking_sleep(line: &str) -> bool {
    line.contains("std::thread::sleep") || line.contains("thread::sleep(")
}

/// Player processes must be spawned through `tokio::process`
pub fn is_std_process_command(line: &str) -> bool {
    line.contains("std::process::Command") || line.contains("process::Command::new")
}

/// Panicking unwraps in shipped code
pub fn is_unwrap_or_expect(line: &str) -> bool {
    line.contains(".unwrap()") || line.contains(".expect(")
}

/// Render violations for an assertion message
pub fn report(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_portion_cuts_at_test_module() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        assert_eq!(production_portion(source), "fn a() {}\n");

        let gated = "fn a() {}\n#[cfg(all(test, unix))]\nmod tests {}\n";
        assert_eq!(production_portion(gated), "fn a() {}\n");
    }

    #[test]
    fn test_scan_skips_comments() {
        let source = "// x.unwrap() here is fine\nlet y = x.unwrap();\n";
        let found = scan_source(Path::new("lib.rs"), source, is_unwrap_or_expect);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].text, "let y = x.unwrap();");
    }

    #[test]
    fn test_detectors() {
        assert!(is_blocking_sleep("std::thread::sleep(d);"));
        assert!(!is_blocking_sleep("tokio::time::sleep(d).await;"));
        assert!(is_std_process_command("let c = std::process::Command::new(\"mpv\");"));
        assert!(!is_std_process_command("use tokio::process::Command;"));
        assert!(is_unwrap_or_expect("x.expect(\"boom\")"));
        assert!(!is_unwrap_or_expect("x.unwrap_or_default()"));
    }

    #[test]
    fn test_sources_found() {
        let files = production_sources();
        assert!(files.iter().any(|p| p.ends_with("lib.rs")));
        assert!(files.iter().any(|p| p.ends_with("main.rs")));
    }
}
