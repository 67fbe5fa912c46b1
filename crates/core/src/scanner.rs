//! Artifact discovery.
//!
//! Walks an artifact root for YAML documents, keeps those whose artifact name
//! passes the include/exclude filter, and folds their tool references into a
//! fresh [`ToolRegistry`]. A document that fails to parse is logged and
//! skipped; the scan continues.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::artifact::ArtifactDefinition;
use crate::registry::ToolRegistry;
use crate::{Error, Result};

const DOCUMENT_EXTENSIONS: &[&str] = &["yaml", "yml"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A document that could not be turned into an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    /// Offending document.
    pub path: PathBuf,
    /// Why it was skipped.
    pub message: String,
}

/// Result of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Artifacts that passed the filter, in path order.
    pub artifacts: Vec<ArtifactDefinition>,
    /// Registry built from every tool reference in `artifacts`.
    pub registry: ToolRegistry,
    /// Documents read (parsed or not).
    pub documents_scanned: usize,
    /// Artifacts dropped by the include/exclude filter.
    pub excluded: usize,
    /// Documents that failed to parse.
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    /// Number of artifacts declaring at least one tool.
    #[must_use]
    pub fn artifacts_with_tools(&self) -> usize {
        self.artifacts.iter().filter(|a| a.has_tools()).count()
    }
}

/// Scans an artifact root.
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    root: PathBuf,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl ArtifactScanner {
    /// Create a scanner with wildcard include/exclude patterns on artifact names.
    ///
    /// An empty include list matches everything. Exclusion overrides inclusion.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid pattern.
    pub fn new(
        root: impl Into<PathBuf>,
        include: &[String],
        exclude: &[String],
    ) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    /// Root directory being scanned.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether an artifact name passes the include/exclude filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(name, MATCH_OPTIONS));
        included
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(name, MATCH_OPTIONS))
    }

    /// Scan the root directory.
    ///
    /// # Errors
    ///
    /// Returns an error only if the root itself is missing or not a directory;
    /// per-document problems are recorded in [`ScanReport::failures`].
    pub fn scan(&self) -> Result<ScanReport> {
        if !self.root.is_dir() {
            return Err(Error::configuration(format!(
                "Artifact path '{}' is not a directory",
                self.root.display()
            )));
        }

        let mut report = ScanReport::default();

        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_document(entry.path()) {
                continue;
            }

            report.documents_scanned += 1;
            let path = entry.path();
            let artifact = match ArtifactDefinition::load(path) {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping artifact document");
                    report.failures.push(ScanFailure {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !self.matches(&artifact.name) {
                debug!(artifact = %artifact.name, "Artifact excluded by pattern");
                report.excluded += 1;
                continue;
            }

            for tool in &artifact.tools {
                report.registry.register(&artifact.name, tool);
            }
            debug!(
                artifact = %artifact.name,
                tools = artifact.tools.len(),
                "Scanned artifact"
            );
            report.artifacts.push(artifact);
        }

        info!(
            root = %self.root.display(),
            documents = report.documents_scanned,
            artifacts = report.artifacts.len(),
            tools = report.registry.len(),
            failures = report.failures.len(),
            "Artifact scan complete"
        );
        Ok(report)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| Error::configuration(format!("Invalid pattern '{p}': {e}")))
        })
        .collect()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|s| s.starts_with('.'))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|ext| e.eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn scanner(root: &Path, include: &[&str], exclude: &[&str]) -> ArtifactScanner {
        let include: Vec<String> = include.iter().map(|s| (*s).to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| (*s).to_string()).collect();
        ArtifactScanner::new(root, &include, &exclude).unwrap()
    }

    #[test]
    fn test_matches_include_exclude() {
        let s = scanner(Path::new("."), &["Windows.*"], &["*.Hayabusa"]);
        assert!(s.matches("Windows.Memory.Acquisition"));
        assert!(s.matches("windows.memory.acquisition"));
        assert!(!s.matches("Windows.EventLogs.Hayabusa"));
        assert!(!s.matches("Linux.Sys.Users"));
    }

    #[test]
    fn test_empty_include_matches_all() {
        let s = scanner(Path::new("."), &[], &[]);
        assert!(s.matches("anything"));
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let err = ArtifactScanner::new(".", &["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_scan_skips_parse_failures_and_continues() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yaml", "name: A\ntools:\n  - name: t\n    url: https://e/t\n");
        write(temp.path(), "broken.yaml", "name: [oops\n");
        write(temp.path(), "sub/c.yml", "name: C\n");
        write(temp.path(), "notes.txt", "name: ignored\n");
        write(temp.path(), ".hidden/d.yaml", "name: D\n");

        let report = scanner(temp.path(), &["*"], &[]).scan().unwrap();
        assert_eq!(report.documents_scanned, 3);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("broken.yaml"));

        let names: Vec<_> = report.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(report.artifacts_with_tools(), 1);
        assert_eq!(report.registry.len(), 1);
    }

    #[test]
    fn test_scan_counts_excluded() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yaml", "name: Keep.Me\n");
        write(temp.path(), "b.yaml", "name: Drop.Me\n");

        let report = scanner(temp.path(), &["*"], &["Drop.*"]).scan().unwrap();
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.excluded, 1);
    }

    #[test]
    fn test_scan_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let err = scanner(&temp.path().join("nope"), &[], &[]).scan().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp = TempDir::new().unwrap();
        let report = scanner(temp.path(), &["*"], &[]).scan().unwrap();
        assert!(report.artifacts.is_empty());
        assert!(report.registry.is_empty());
        assert_eq!(report.documents_scanned, 0);
    }
}
