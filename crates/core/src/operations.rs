//! Top-level operations.
//!
//! [`Pipeline::run`] is the boundary toward the command line: it chains the
//! stages an [`Operation`] needs and always returns an [`OperationResult`].
//! Errors never cross it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cache::{CacheManager, ToolCache};
use crate::download::{
    DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, DownloadCoordinator, DownloadOptions, ToolFetcher,
};
use crate::mapping::MappingExporter;
use crate::package::PackageAssembler;
use crate::registry::{DownloadStatus, ToolRegistry};
use crate::scanner::{ArtifactScanner, ScanReport};
use crate::{Error, Result};

/// Operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Scan artifacts and persist the registry.
    Scan,
    /// Scan and download tools.
    Download,
    /// Scan and export the mapping report.
    Map,
    /// Scan, download and assemble the package.
    Package,
    /// Reset the tool cache.
    Clean,
    /// Scan, download, export and assemble.
    All,
}

impl Operation {
    /// Every operation.
    pub const ALL: [Self; 6] = [
        Self::Scan,
        Self::Download,
        Self::Map,
        Self::Package,
        Self::Clean,
        Self::All,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Download => "download",
            Self::Map => "map",
            Self::Package => "package",
            Self::Clean => "clean",
            Self::All => "all",
        }
    }

    const fn downloads(self) -> bool {
        matches!(self, Self::Download | Self::Package | Self::All)
    }

    const fn exports_mapping(self) -> bool {
        matches!(self, Self::Map | Self::All)
    }

    const fn packages(self) -> bool {
        matches!(self, Self::Package | Self::All)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::configuration(format!(
                    "Unknown operation '{s}'; expected one of scan, download, map, package, clean, all"
                ))
            })
    }
}

/// Inputs of one operation.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// What to run.
    pub operation: Operation,
    /// Artifact source directory.
    pub artifacts_path: PathBuf,
    /// Tool cache root.
    pub cache_dir: PathBuf,
    /// Output directory for reports and the package.
    pub output_dir: PathBuf,
    /// Artifact name include patterns.
    pub include: Vec<String>,
    /// Artifact name exclude patterns.
    pub exclude: Vec<String>,
    /// Concurrent downloads.
    pub concurrency: usize,
    /// Write the offline archive.
    pub offline: bool,
    /// Validate declared hashes.
    pub validate_hashes: bool,
    /// Ignore cached binaries.
    pub force: bool,
    /// Per-download timeout.
    pub timeout: Duration,
}

impl OperationRequest {
    /// Request with default options.
    #[must_use]
    pub fn new(
        operation: Operation,
        artifacts_path: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            operation,
            artifacts_path: artifacts_path.into(),
            cache_dir: cache_dir.into(),
            output_dir: output_dir.into(),
            include: vec!["*".to_string()],
            exclude: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            offline: false,
            validate_hashes: false,
            force: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Counters collected while running an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    /// Artifacts that passed the filter.
    pub artifacts: usize,
    /// Unique tools.
    pub tools: usize,
    /// Tools fetched this run.
    pub downloaded: usize,
    /// Tools found in the cache.
    pub cached: usize,
    /// Tools that failed.
    pub failed: usize,
    /// Tools in the package manifest.
    pub packaged: usize,
    /// Documents that failed to parse.
    pub scan_failures: usize,
    /// Metadata conflicts between artifacts.
    pub conflicts: usize,
    /// Whether the package holds every tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_complete: Option<bool>,
    /// Mapping report path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<PathBuf>,
    /// Offline archive path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    /// Cache files removed by `clean`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_removed: Option<usize>,
}

/// Structured outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation completed.
    pub success: bool,
    /// Operation that ran.
    pub operation: Operation,
    /// Artifact source directory.
    pub artifacts_path: PathBuf,
    /// Tool cache root.
    pub cache_dir: PathBuf,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure category (see [`Error::kind`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Counters.
    pub stats: OperationStats,
}

/// Runs operations against a tool fetcher.
pub struct Pipeline {
    fetcher: Arc<dyn ToolFetcher>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("fetcher", &self.fetcher.name())
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline fetching tools through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ToolFetcher>) -> Self {
        Self { fetcher }
    }

    /// Run an operation.
    pub async fn run(&self, request: &OperationRequest) -> OperationResult {
        info!(
            operation = %request.operation,
            artifacts = %request.artifacts_path.display(),
            cache = %request.cache_dir.display(),
            output = %request.output_dir.display(),
            "Starting operation"
        );

        let mut stats = OperationStats::default();
        let outcome = self.execute(request, &mut stats).await;

        let (error, error_kind) = match outcome {
            Ok(()) => {
                info!(operation = %request.operation, "Operation completed");
                (None, None)
            }
            Err(e) => {
                error!(operation = %request.operation, error = %e, "Operation failed");
                (Some(e.to_string()), Some(e.kind().to_string()))
            }
        };

        OperationResult {
            success: error.is_none(),
            operation: request.operation,
            artifacts_path: request.artifacts_path.clone(),
            cache_dir: request.cache_dir.clone(),
            output_dir: request.output_dir.clone(),
            completed_at: Utc::now(),
            error,
            error_kind,
            stats,
        }
    }

    async fn execute(&self, request: &OperationRequest, stats: &mut OperationStats) -> Result<()> {
        let cache = ToolCache::new(&request.cache_dir);

        if request.operation == Operation::Clean {
            let cleared = CacheManager::new(cache).clear()?;
            stats.files_removed = Some(cleared.files_removed);
            return Ok(());
        }

        let ScanReport {
            artifacts,
            mut registry,
            failures,
            ..
        } = ArtifactScanner::new(&request.artifacts_path, &request.include, &request.exclude)?
            .scan()?;
        stats.artifacts = artifacts.len();
        stats.tools = registry.len();
        stats.scan_failures = failures.len();
        stats.conflicts = registry.conflicts().len();

        let previous = match ToolRegistry::load_snapshot(&cache.snapshot_path()) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable registry snapshot");
                None
            }
        };
        registry.reconcile_with_cache(&cache, request.force);
        if let Some(previous) = &previous {
            registry.inherit_checksums(previous);
        }

        if request.operation.downloads() {
            let options = DownloadOptions::new()
                .with_concurrency(request.concurrency)
                .with_validate_hashes(request.validate_hashes)
                .with_force(request.force)
                .with_timeout(request.timeout);
            DownloadCoordinator::new(Arc::clone(&self.fetcher), cache.clone(), options)
                .run(&mut registry)
                .await?;
        } else if request.operation == Operation::Scan {
            cache.ensure_dirs()?;
            registry.save_snapshot(&cache.snapshot_path())?;
        }
        record_statuses(&registry, stats);

        if request.operation.exports_mapping() {
            let exported = MappingExporter::new(&request.output_dir).export(&artifacts, &registry)?;
            stats.mapping = Some(exported.json_path);
        }

        if request.operation.packages() {
            let package = PackageAssembler::new(&request.output_dir)
                .with_offline(request.offline)
                .protect(&request.artifacts_path)
                .protect(cache.tools_dir())
                .assemble(&artifacts, &registry)?;
            stats.packaged = package.manifest.len();
            stats.package_complete = Some(package.summary.complete);
            stats.archive = package.archive;
        }

        Ok(())
    }
}

fn record_statuses(registry: &ToolRegistry, stats: &mut OperationStats) {
    stats.downloaded = registry.count_status(DownloadStatus::Downloaded);
    stats.cached = registry.count_status(DownloadStatus::Cached);
    stats.failed = registry.count_status(DownloadStatus::Failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoNetwork;

    #[async_trait]
    impl ToolFetcher for NoNetwork {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::download(url, "network disabled"))
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(NoNetwork))
    }

    #[test]
    fn test_operation_parse_and_display() {
        assert_eq!("Package".parse::<Operation>().unwrap(), Operation::Package);
        assert_eq!(" all ".parse::<Operation>().unwrap(), Operation::All);
        assert!("deploy".parse::<Operation>().is_err());
        for op in Operation::ALL {
            assert_eq!(op.to_string().parse::<Operation>().unwrap(), op);
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_path_is_failed_result() {
        let temp = TempDir::new().unwrap();
        let request = OperationRequest::new(
            Operation::Scan,
            temp.path().join("missing"),
            temp.path().join("cache"),
            temp.path().join("out"),
        );
        let result = pipeline().run(&request).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not a directory"));
        assert_eq!(result.error_kind.as_deref(), Some("configuration"));
        assert_eq!(result.operation, Operation::Scan);
    }

    #[tokio::test]
    async fn test_failed_operation_keeps_previous_snapshot() {
        let temp = TempDir::new().unwrap();
        let artifacts = temp.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(
            artifacts.join("a.yaml"),
            "name: A\ntools:\n  - name: t\n    url: https://e/t.exe\n",
        )
        .unwrap();
        let cache = temp.path().join("cache");

        let ok = pipeline()
            .run(&OperationRequest::new(
                Operation::Scan,
                &artifacts,
                &cache,
                temp.path().join("out"),
            ))
            .await;
        assert!(ok.success);
        let before = std::fs::read(cache.join("registry.json")).unwrap();

        let mut bad = OperationRequest::new(Operation::Scan, &artifacts, &cache, temp.path());
        bad.include = vec!["[".to_string()];
        let result = pipeline().run(&bad).await;
        assert!(!result.success);
        assert_eq!(std::fs::read(cache.join("registry.json")).unwrap(), before);
    }

    #[tokio::test]
    async fn test_download_failures_do_not_fail_operation() {
        let temp = TempDir::new().unwrap();
        let artifacts = temp.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(
            artifacts.join("a.yaml"),
            "name: A\ntools:\n  - name: t\n    url: https://e/t.exe\n",
        )
        .unwrap();

        let request = OperationRequest::new(
            Operation::Package,
            &artifacts,
            temp.path().join("cache"),
            temp.path().join("out"),
        );
        let result = pipeline().run(&request).await;
        assert!(result.success);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.packaged, 0);
        assert_eq!(result.stats.package_complete, Some(false));
    }

    #[tokio::test]
    async fn test_clean_reports_removed_files() {
        let temp = TempDir::new().unwrap();
        let cache = ToolCache::new(temp.path().join("cache"));
        let path = cache.tool_path("t", "https://e/t.exe");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();

        let request = OperationRequest::new(
            Operation::Clean,
            temp.path(),
            cache.root(),
            temp.path().join("out"),
        );
        let result = pipeline().run(&request).await;
        assert!(result.success);
        assert_eq!(result.stats.files_removed, Some(1));
        assert!(!path.exists());
    }
}
