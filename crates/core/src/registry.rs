//! Deduplicated tool registry.
//!
//! The registry maps each unique tool name to a [`ToolRecord`] aggregating the
//! tool's metadata (first sighting wins) and the artifacts that consume it.
//! It is persisted as a JSON snapshot under the cache root.
//!
//! ## Snapshot structure
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2026-01-01T00:00:00Z",
//!   "tools": [
//!     { "name": "hayabusa", "url": "https://...", "consumers": ["A", "B"], "status": "downloaded" }
//!   ],
//!   "conflicts": []
//! }
//! ```

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::artifact::ToolReference;
use crate::cache::ToolCache;
use crate::{Error, Result};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Download state of a tool within one run.
///
/// `Pending` moves to exactly one of the other states; those are terminal for
/// the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Not yet resolved this run.
    #[default]
    Pending,
    /// Found in the cache, no fetch performed.
    Cached,
    /// Fetched during this run.
    Downloaded,
    /// Fetch or validation failed.
    Failed,
}

impl DownloadStatus {
    /// Whether the tool has a usable local binary.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Cached | Self::Downloaded)
    }

    /// Whether the status is terminal for the run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Cached => write!(f, "cached"),
            Self::Downloaded => write!(f, "downloaded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Registry entry for one unique tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool name (registry key).
    pub name: String,
    /// Download URL from the first sighting.
    pub url: String,
    /// Version from the first sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Expected SHA-256 from the first sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// Serve-locally flag from the first sighting.
    #[serde(default)]
    pub serve_locally: bool,
    /// Executable flag from the first sighting.
    #[serde(default)]
    pub is_executable: bool,
    /// Consuming artifact names, in first-reference order.
    pub consumers: IndexSet<String>,
    /// Download state.
    #[serde(default)]
    pub status: DownloadStatus,
    /// Path of the cached binary once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Size of the cached binary in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// SHA-256 of the fetched content, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Failure message when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolRecord {
    fn from_reference(reference: &ToolReference) -> Self {
        Self {
            name: reference.name.clone(),
            url: reference.url.clone(),
            version: reference.version.clone(),
            expected_hash: reference.expected_hash.clone(),
            serve_locally: reference.serve_locally,
            is_executable: reference.is_executable,
            consumers: IndexSet::new(),
            status: DownloadStatus::Pending,
            local_path: None,
            size: None,
            sha256: None,
            error: None,
        }
    }

    /// Number of consuming artifacts.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

/// A later declaration whose metadata differed from the first sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConflict {
    /// Tool name.
    pub tool: String,
    /// Artifact carrying the ignored value.
    pub artifact: String,
    /// Field that diverged (`url` or `expected_hash`).
    pub field: String,
    /// Value retained from the first sighting.
    pub kept: String,
    /// Value that was ignored.
    pub ignored: String,
}

/// Terminal result of resolving one tool, applied by the owner of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The binary was already in the cache.
    Cached {
        /// Cached binary.
        path: PathBuf,
        /// Size in bytes.
        size: u64,
    },
    /// The binary was fetched this run.
    Downloaded {
        /// Cached binary.
        path: PathBuf,
        /// Size in bytes.
        size: u64,
        /// SHA-256 of the content.
        sha256: String,
    },
    /// Fetch or validation failed.
    Failed {
        /// Failure message.
        error: String,
    },
}

/// Name → [`ToolRecord`] map in first-sighting order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolRecord>,
    conflicts: Vec<MetadataConflict>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    tools: Vec<ToolRecord>,
    #[serde(default)]
    conflicts: Vec<MetadataConflict>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a tool reference from `artifact` into the registry.
    ///
    /// Creates the record on first sighting; otherwise appends the consumer and
    /// records a [`MetadataConflict`] for every diverging field.
    pub fn register(&mut self, artifact: &str, reference: &ToolReference) {
        let record = self
            .tools
            .entry(reference.name.clone())
            .or_insert_with(|| {
                debug!(tool = %reference.name, artifact, "Registered new tool");
                ToolRecord::from_reference(reference)
            });

        let mut conflicts = Vec::new();
        if record.url != reference.url {
            conflicts.push(("url", record.url.clone(), reference.url.clone()));
        }
        if let Some(hash) = &reference.expected_hash
            && record.expected_hash.as_ref() != Some(hash)
        {
            conflicts.push((
                "expected_hash",
                record.expected_hash.clone().unwrap_or_default(),
                hash.clone(),
            ));
        }
        record.consumers.insert(artifact.to_string());

        for (field, kept, ignored) in conflicts {
            warn!(
                tool = %reference.name,
                artifact,
                field,
                kept = %kept,
                ignored = %ignored,
                "Tool redeclared with different metadata; keeping first-seen value"
            );
            self.conflicts.push(MetadataConflict {
                tool: reference.name.clone(),
                artifact: artifact.to_string(),
                field: field.to_string(),
                kept,
                ignored,
            });
        }
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolRecord> {
        self.tools.get(name)
    }

    /// Iterate records in first-sighting order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolRecord> {
        self.tools.values()
    }

    /// Tool names in first-sighting order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of unique tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry holds no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Metadata conflicts recorded while registering.
    #[must_use]
    pub fn conflicts(&self) -> &[MetadataConflict] {
        &self.conflicts
    }

    /// Count tools with the given status.
    #[must_use]
    pub fn count_status(&self, status: DownloadStatus) -> usize {
        self.iter().filter(|r| r.status == status).count()
    }

    /// Apply a terminal outcome to a pending tool.
    ///
    /// Returns `false` (and changes nothing) when the tool is unknown or
    /// already terminal, keeping transitions monotonic.
    pub fn apply(&mut self, name: &str, outcome: ToolOutcome) -> bool {
        let Some(record) = self.tools.get_mut(name) else {
            warn!(tool = name, "Outcome for unknown tool ignored");
            return false;
        };
        if record.status.is_terminal() {
            debug!(tool = name, status = %record.status, "Tool already resolved; outcome ignored");
            return false;
        }

        match outcome {
            ToolOutcome::Cached { path, size } => {
                record.status = DownloadStatus::Cached;
                record.local_path = Some(path);
                record.size = Some(size);
            }
            ToolOutcome::Downloaded { path, size, sha256 } => {
                record.status = DownloadStatus::Downloaded;
                record.local_path = Some(path);
                record.size = Some(size);
                record.sha256 = Some(sha256);
            }
            ToolOutcome::Failed { error } => {
                record.status = DownloadStatus::Failed;
                record.error = Some(error);
            }
        }
        true
    }

    /// Mark every pending tool whose binary is already cached as `Cached`.
    ///
    /// With `force`, nothing is marked so the next download refetches.
    /// Returns the number of tools marked.
    pub fn reconcile_with_cache(&mut self, cache: &ToolCache, force: bool) -> usize {
        if force {
            debug!("Force refetch requested; skipping cache reconciliation");
            return 0;
        }

        let hits: Vec<(String, PathBuf)> = self
            .iter()
            .filter(|r| r.status == DownloadStatus::Pending)
            .filter_map(|r| cache.get(&r.name, &r.url).map(|p| (r.name.clone(), p)))
            .collect();

        let mut marked = 0;
        for (name, path) in hits {
            let size = std::fs::metadata(&path).map_or(0, |m| m.len());
            if self.apply(&name, ToolOutcome::Cached { path, size }) {
                marked += 1;
            }
        }
        marked
    }

    /// Carry checksums from an earlier snapshot onto `Cached` tools.
    ///
    /// A record inherits only when the earlier one had the same URL, cache
    /// path and size. Returns the number of records updated.
    pub fn inherit_checksums(&mut self, previous: &Self) -> usize {
        let mut inherited = 0;
        for record in self.tools.values_mut() {
            if record.status != DownloadStatus::Cached || record.sha256.is_some() {
                continue;
            }
            let Some(earlier) = previous.get(&record.name) else {
                continue;
            };
            if earlier.url == record.url
                && earlier.local_path == record.local_path
                && earlier.size == record.size
                && let Some(sha256) = &earlier.sha256
            {
                record.sha256 = Some(sha256.clone());
                inherited += 1;
            }
        }
        if inherited > 0 {
            debug!(inherited, "Reused checksums from previous snapshot");
        }
        inherited
    }

    /// Load a snapshot from disk.
    ///
    /// Returns `None` if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or was
    /// written by a newer format version.
    pub fn load_snapshot(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read snapshot"))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| Error::serialization(format!("Failed to parse snapshot: {e}")))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::configuration(format!(
                "Registry snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        Ok(Some(Self {
            tools: snapshot
                .tools
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
            conflicts: snapshot.conflicts,
        }))
    }

    /// Save the registry snapshot atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails; an
    /// existing snapshot is left untouched in that case.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            tools: self.tools.values().cloned().collect(),
            conflicts: self.conflicts.clone(),
        };
        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::serialization(format!("Failed to serialize snapshot: {e}")))?;
        write_atomic(path, content.as_bytes())?;
        debug!(path = %path.display(), tools = self.len(), "Saved registry snapshot");
        Ok(())
    }
}

/// Write a file via a temporary sibling and rename it into place.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let temp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp, content).map_err(|e| Error::io(e, &temp, "write"))?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        Error::io(e, path, "rename")
    })
}
