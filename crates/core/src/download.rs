//! Bounded-concurrency tool downloads.
//!
//! The [`DownloadCoordinator`] owns the registry for the duration of a run.
//! Fetch tasks never touch shared state: each returns a [`FetchReport`] that
//! the coordinator folds into the registry once the task settles. At most
//! `concurrency` fetches are in flight; dispatch blocks on a semaphore permit
//! and proceeds in registry order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::ToolCache;
use crate::registry::{DownloadStatus, ToolOutcome, ToolRegistry, write_atomic};
use crate::{Error, Result};

/// Default per-download timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of concurrent downloads.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Transport used to retrieve tool content.
///
/// Implementations only move bytes; timeouts, hashing and cache writes are the
/// coordinator's job.
///
/// # Example
///
/// ```ignore
/// pub struct HttpToolFetcher { /* ... */ }
///
/// #[async_trait]
/// impl ToolFetcher for HttpToolFetcher {
///     fn name(&self) -> &'static str { "http" }
///     async fn fetch(&self, url: &str) -> Result<Vec<u8>> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait ToolFetcher: Send + Sync {
    /// Fetcher name for logs.
    fn name(&self) -> &'static str;

    /// Retrieve the full content at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success response.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Options for a download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Maximum in-flight fetches (values below 1 are treated as 1).
    pub concurrency: usize,
    /// Compare fetched content against declared hashes.
    pub validate_hashes: bool,
    /// Refetch even when the binary is cached.
    pub force: bool,
    /// Time budget for a single fetch.
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            validate_hashes: false,
            force: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DownloadOptions {
    /// Create options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency bound.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enable or disable hash validation.
    #[must_use]
    pub fn with_validate_hashes(mut self, validate: bool) -> Self {
        self.validate_hashes = validate;
        self
    }

    /// Set force refetch.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the per-fetch timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Concurrency bound actually used.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Failure of one tool in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFailure {
    /// Tool name.
    pub tool: String,
    /// Failure message.
    pub error: String,
}

/// Totals of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSummary {
    /// Fetched this run.
    pub downloaded: usize,
    /// Already cached.
    pub cached: usize,
    /// Failed fetch or validation.
    pub failed: usize,
    /// Per-tool failures in completion order.
    pub failures: Vec<DownloadFailure>,
}

/// Result returned by a fetch task.
#[derive(Debug)]
struct FetchReport {
    name: String,
    outcome: ToolOutcome,
}

/// Everything a fetch task needs, owned so the task is `'static`.
#[derive(Debug, Clone)]
struct FetchJob {
    name: String,
    url: String,
    expected_hash: Option<String>,
    dest: PathBuf,
}

/// Coordinates fetching every pending tool in a registry.
pub struct DownloadCoordinator {
    fetcher: Arc<dyn ToolFetcher>,
    cache: ToolCache,
    options: DownloadOptions,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("fetcher", &self.fetcher.name())
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish()
    }
}

impl DownloadCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ToolFetcher>, cache: ToolCache, options: DownloadOptions) -> Self {
        Self {
            fetcher,
            cache,
            options,
        }
    }

    /// Resolve every pending tool, then persist the registry snapshot.
    ///
    /// Tools already cached are marked without I/O (unless `force`). Failures
    /// are recorded per tool and never abort siblings. Returns after every
    /// dispatched fetch has settled.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or the
    /// snapshot cannot be written.
    pub async fn run(&self, registry: &mut ToolRegistry) -> Result<DownloadSummary> {
        self.cache.ensure_dirs()?;

        let mut summary = DownloadSummary {
            cached: registry.count_status(DownloadStatus::Cached),
            downloaded: registry.count_status(DownloadStatus::Downloaded),
            ..DownloadSummary::default()
        };

        let mut jobs = Vec::new();
        for record in registry.iter() {
            if record.status.is_terminal() {
                continue;
            }
            let dest = self.cache.tool_path(&record.name, &record.url);
            jobs.push(FetchJob {
                name: record.name.clone(),
                url: record.url.clone(),
                expected_hash: record.expected_hash.clone(),
                dest,
            });
        }

        let mut reports = Vec::new();
        let mut to_fetch = Vec::new();
        for job in jobs {
            if !self.options.force
                && let Some(path) = self.cache.get(&job.name, &job.url)
            {
                let size = std::fs::metadata(&path).map_or(0, |m| m.len());
                reports.push(FetchReport {
                    name: job.name,
                    outcome: ToolOutcome::Cached { path, size },
                });
            } else {
                to_fetch.push(job);
            }
        }
        for report in reports {
            Self::fold(registry, &mut summary, report);
        }

        info!(
            fetcher = self.fetcher.name(),
            pending = to_fetch.len(),
            concurrency = self.options.effective_concurrency(),
            "Starting tool downloads"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.effective_concurrency()));
        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, String> = HashMap::new();

        for job in to_fetch {
            // Admission: wait for a free slot before dispatching the next job
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::configuration(format!("Download semaphore closed: {e}")))?;

            // Fold whatever settled while we waited
            while let Some(joined) = join_set.try_join_next_with_id() {
                Self::settle(registry, &mut summary, &mut in_flight, joined);
            }

            let fetcher = Arc::clone(&self.fetcher);
            let validate = self.options.validate_hashes;
            let timeout = self.options.timeout;
            let name = job.name.clone();
            debug!(tool = %name, url = %job.url, "Dispatching fetch");

            let handle = join_set.spawn(async move {
                let _permit = permit;
                let outcome = fetch_tool(fetcher.as_ref(), &job, validate, timeout).await;
                FetchReport {
                    name: job.name,
                    outcome,
                }
            });
            in_flight.insert(handle.id(), name);
        }

        // Barrier: every dispatched fetch settles before the snapshot is written
        while let Some(joined) = join_set.join_next_with_id().await {
            Self::settle(registry, &mut summary, &mut in_flight, joined);
        }

        registry.save_snapshot(&self.cache.snapshot_path())?;

        info!(
            downloaded = summary.downloaded,
            cached = summary.cached,
            failed = summary.failed,
            "Tool downloads settled"
        );
        Ok(summary)
    }

    fn settle(
        registry: &mut ToolRegistry,
        summary: &mut DownloadSummary,
        in_flight: &mut HashMap<tokio::task::Id, String>,
        joined: std::result::Result<(tokio::task::Id, FetchReport), tokio::task::JoinError>,
    ) {
        let report = match joined {
            Ok((id, report)) => {
                in_flight.remove(&id);
                report
            }
            Err(e) => {
                let Some(name) = in_flight.remove(&e.id()) else {
                    warn!(error = %e, "Untracked fetch task failed");
                    return;
                };
                FetchReport {
                    name,
                    outcome: ToolOutcome::Failed {
                        error: format!("fetch task aborted: {e}"),
                    },
                }
            }
        };
        Self::fold(registry, summary, report);
    }

    fn fold(registry: &mut ToolRegistry, summary: &mut DownloadSummary, report: FetchReport) {
        match &report.outcome {
            ToolOutcome::Cached { .. } => summary.cached += 1,
            ToolOutcome::Downloaded { size, .. } => {
                info!(tool = %report.name, size, "Tool downloaded");
                summary.downloaded += 1;
            }
            ToolOutcome::Failed { error } => {
                warn!(tool = %report.name, error = %error, "Tool download failed");
                summary.failed += 1;
                summary.failures.push(DownloadFailure {
                    tool: report.name.clone(),
                    error: error.clone(),
                });
            }
        }
        registry.apply(&report.name, report.outcome);
    }
}

async fn fetch_tool(
    fetcher: &dyn ToolFetcher,
    job: &FetchJob,
    validate: bool,
    timeout: Duration,
) -> ToolOutcome {
    let result = match tokio::time::timeout(timeout, fetcher.fetch(&job.url)).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(&job.name, timeout.as_secs())),
    };

    let stored = match result {
        Ok(bytes) => {
            // Hashing and the cache write are blocking file work
            let store_job = job.clone();
            tokio::task::spawn_blocking(move || store_fetched(&store_job, &bytes, validate))
                .await
                .map_err(|e| Error::download(&job.url, format!("store task aborted: {e}")))
                .and_then(|stored| stored)
        }
        Err(e) => Err(e),
    };

    match stored {
        Ok(outcome) => outcome,
        Err(e) => ToolOutcome::Failed {
            error: e.to_string(),
        },
    }
}

fn store_fetched(job: &FetchJob, bytes: &[u8], validate: bool) -> Result<ToolOutcome> {
    let sha256 = sha256_hex(bytes);

    if validate
        && let Some(expected) = &job.expected_hash
        && !expected.eq_ignore_ascii_case(&sha256)
    {
        return Err(Error::hash_mismatch(&job.name, expected, sha256));
    }

    write_atomic(&job.dest, bytes)?;
    Ok(ToolOutcome::Downloaded {
        path: job.dest.clone(),
        size: bytes.len() as u64,
        sha256,
    })
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of a file on disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(e, path, "read for checksum"))?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ToolReference;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Scripted fetcher: serves fixed payloads, tracks peak concurrency.
    struct ScriptedFetcher {
        payloads: HashMap<String, Vec<u8>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(payloads: &[(&str, &[u8])], delay: Duration) -> Self {
            Self {
                payloads: payloads
                    .iter()
                    .map(|(u, b)| ((*u).to_string(), b.to_vec()))
                    .collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolFetcher for ScriptedFetcher {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.payloads
                .get(url)
                .cloned()
                .ok_or_else(|| Error::download(url, "HTTP 404"))
        }
    }

    fn registry_with(tools: &[(&str, &str, Option<&str>)]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for (name, url, hash) in tools {
            registry.register(
                "Test.Artifact",
                &ToolReference {
                    name: (*name).into(),
                    url: (*url).into(),
                    expected_hash: hash.map(String::from),
                    version: None,
                    serve_locally: false,
                    is_executable: true,
                },
            );
        }
        registry
    }

    #[tokio::test]
    async fn test_downloads_and_persists_snapshot() {
        let temp = TempDir::new().unwrap();
        let cache = ToolCache::new(temp.path());
        let fetcher = Arc::new(ScriptedFetcher::new(
            &[("https://e/a.exe", b"alpha")],
            Duration::ZERO,
        ));
        let mut registry = registry_with(&[("a", "https://e/a.exe", None)]);

        let coordinator = DownloadCoordinator::new(fetcher, cache.clone(), DownloadOptions::new());
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.downloaded, 1);
        let record = registry.get("a").unwrap();
        assert_eq!(record.status, DownloadStatus::Downloaded);
        assert_eq!(record.sha256.as_deref(), Some(sha256_hex(b"alpha").as_str()));
        assert_eq!(std::fs::read(record.local_path.as_ref().unwrap()).unwrap(), b"alpha");

        let snapshot = ToolRegistry::load_snapshot(&cache.snapshot_path())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.get("a").unwrap().status, DownloadStatus::Downloaded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound_is_respected() {
        let temp = TempDir::new().unwrap();
        let urls: Vec<String> = (0..8).map(|i| format!("https://e/t{i}.bin")).collect();
        let payloads: Vec<(&str, &[u8])> =
            urls.iter().map(|u| (u.as_str(), b"x".as_slice())).collect();
        let fetcher = Arc::new(ScriptedFetcher::new(&payloads, Duration::from_millis(30)));

        let names: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
        let tools: Vec<(&str, &str, Option<&str>)> = names
            .iter()
            .zip(&urls)
            .map(|(n, u)| (n.as_str(), u.as_str(), None))
            .collect();
        let mut registry = registry_with(&tools);

        let coordinator = DownloadCoordinator::new(
            Arc::clone(&fetcher) as Arc<dyn ToolFetcher>,
            ToolCache::new(temp.path()),
            DownloadOptions::new().with_concurrency(2),
        );
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.downloaded, 8);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak in-flight {peak} exceeded bound");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_treated_as_one() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(
            &[("https://e/a", b"a"), ("https://e/b", b"b")],
            Duration::from_millis(5),
        ));
        let mut registry = registry_with(&[("a", "https://e/a", None), ("b", "https://e/b", None)]);

        let coordinator = DownloadCoordinator::new(
            Arc::clone(&fetcher) as Arc<dyn ToolFetcher>,
            ToolCache::new(temp.path()),
            DownloadOptions::new().with_concurrency(0),
        );
        coordinator.run(&mut registry).await.unwrap();

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
        // Sequential dispatch follows registry order
        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            vec!["https://e/a".to_string(), "https://e/b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_hash_mismatch_fails_without_caching() {
        let temp = TempDir::new().unwrap();
        let cache = ToolCache::new(temp.path());
        let fetcher = Arc::new(ScriptedFetcher::new(
            &[("https://e/yara.exe", b"tampered"), ("https://e/ok.exe", b"ok")],
            Duration::ZERO,
        ));
        let ok_hash = sha256_hex(b"ok");
        let mut registry = registry_with(&[
            ("yara", "https://e/yara.exe", Some("00ff")),
            ("ok", "https://e/ok.exe", Some(ok_hash.as_str())),
        ]);

        let coordinator = DownloadCoordinator::new(
            fetcher,
            cache.clone(),
            DownloadOptions::new().with_validate_hashes(true),
        );
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.downloaded, 1);
        let yara = registry.get("yara").unwrap();
        assert_eq!(yara.status, DownloadStatus::Failed);
        assert!(yara.error.as_ref().unwrap().contains("Hash mismatch"));
        assert!(cache.get("yara", "https://e/yara.exe").is_none());
        assert_eq!(registry.get("ok").unwrap().status, DownloadStatus::Downloaded);
    }

    #[tokio::test]
    async fn test_hash_not_checked_when_validation_disabled() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(
            &[("https://e/yara.exe", b"tampered")],
            Duration::ZERO,
        ));
        let mut registry = registry_with(&[("yara", "https://e/yara.exe", Some("00ff"))]);

        let coordinator =
            DownloadCoordinator::new(fetcher, ToolCache::new(temp.path()), DownloadOptions::new());
        coordinator.run(&mut registry).await.unwrap();
        assert_eq!(
            registry.get("yara").unwrap().status,
            DownloadStatus::Downloaded
        );
    }

    #[tokio::test]
    async fn test_cached_tools_are_not_fetched() {
        let temp = TempDir::new().unwrap();
        let cache = ToolCache::new(temp.path());
        let path = cache.tool_path("a", "https://e/a.exe");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"cached").unwrap();

        let fetcher = Arc::new(ScriptedFetcher::new(&[], Duration::ZERO));
        let mut registry = registry_with(&[("a", "https://e/a.exe", None)]);
        let coordinator = DownloadCoordinator::new(
            Arc::clone(&fetcher) as Arc<dyn ToolFetcher>,
            cache.clone(),
            DownloadOptions::new(),
        );
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.cached, 1);
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(registry.get("a").unwrap().size, Some(6));
    }

    #[tokio::test]
    async fn test_force_refetches_cached_tools() {
        let temp = TempDir::new().unwrap();
        let cache = ToolCache::new(temp.path());
        let path = cache.tool_path("a", "https://e/a.exe");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"old").unwrap();

        let fetcher = Arc::new(ScriptedFetcher::new(&[("https://e/a.exe", b"new")], Duration::ZERO));
        let mut registry = registry_with(&[("a", "https://e/a.exe", None)]);
        let coordinator = DownloadCoordinator::new(
            fetcher,
            cache,
            DownloadOptions::new().with_force(true),
        );
        coordinator.run(&mut registry).await.unwrap();

        assert_eq!(registry.get("a").unwrap().status, DownloadStatus::Downloaded);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(
            &[("https://e/slow", b"slow")],
            Duration::from_secs(5),
        ));
        let mut registry = registry_with(&[("slow", "https://e/slow", None)]);
        let coordinator = DownloadCoordinator::new(
            fetcher,
            ToolCache::new(temp.path()),
            DownloadOptions::new().with_timeout(Duration::from_millis(20)),
        );
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.failed, 1);
        let record = registry.get("slow").unwrap();
        assert_eq!(record.status, DownloadStatus::Failed);
        assert!(record.error.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(&[("https://e/good", b"g")], Duration::ZERO));
        let mut registry = registry_with(&[
            ("missing", "https://e/missing", None),
            ("good", "https://e/good", None),
        ]);
        let coordinator =
            DownloadCoordinator::new(fetcher, ToolCache::new(temp.path()), DownloadOptions::new());
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].tool, "missing");
        assert!(summary.failures[0].error.contains("HTTP 404"));
        assert_eq!(registry.get("good").unwrap().status, DownloadStatus::Downloaded);
    }

    /// Panics on one URL, serves everything else.
    struct PanickingFetcher;

    #[async_trait]
    impl ToolFetcher for PanickingFetcher {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            if url.ends_with("/boom.exe") {
                panic!("transport exploded");
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn test_panicked_fetch_fails_only_that_tool() {
        let temp = TempDir::new().unwrap();
        let mut registry = registry_with(&[
            ("boom", "https://e/boom.exe", None),
            ("calm", "https://e/calm.exe", None),
        ]);
        let coordinator = DownloadCoordinator::new(
            Arc::new(PanickingFetcher),
            ToolCache::new(temp.path()),
            DownloadOptions::new(),
        );
        let summary = coordinator.run(&mut registry).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.downloaded, 1);
        let boom = registry.get("boom").unwrap();
        assert_eq!(boom.status, DownloadStatus::Failed);
        assert!(boom.error.as_ref().unwrap().contains("panicked"));
        assert_eq!(summary.failures[0].tool, "boom");
        assert_eq!(registry.get("calm").unwrap().status, DownloadStatus::Downloaded);
        assert_eq!(registry.count_status(DownloadStatus::Pending), 0);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
