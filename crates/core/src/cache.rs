//! On-disk cache of downloaded tool binaries.
//!
//! Every tool has one deterministic cache path derived from its name and URL,
//! so a rerun finds previously fetched binaries without network requests.
//!
//! Structure:
//! ```text
//! <cache root>/
//! ├── registry.json          # Registry snapshot
//! └── tools/
//!     └── <tool dir name>/
//!         └── <url file name>
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::download::sha256_hex;
use crate::paths::{self, TOOLS_DIR};
use crate::registry::ToolRegistry;
use crate::{Error, Result};

/// Tool binary cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct ToolCache {
    root: PathBuf,
}

impl ToolCache {
    /// Create a cache at the specified root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every cached tool.
    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.root.join(TOOLS_DIR)
    }

    /// Path of the registry snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        paths::snapshot_path(&self.root)
    }

    /// Deterministic cache path for a tool.
    #[must_use]
    pub fn tool_path(&self, name: &str, url: &str) -> PathBuf {
        self.tools_dir()
            .join(tool_dir_name(name))
            .join(file_name_for(name, url))
    }

    /// Get the cached binary for a tool if it exists.
    #[must_use]
    pub fn get(&self, name: &str, url: &str) -> Option<PathBuf> {
        let path = self.tool_path(name, url);
        if path.is_file() {
            trace!(tool = name, ?path, "Cache hit for tool");
            Some(path)
        } else {
            trace!(tool = name, "Cache miss for tool");
            None
        }
    }

    /// Ensure the cache directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        paths::ensure_dir(&self.tools_dir())
    }
}

/// Destructive reset of the tool cache.
///
/// Removes every cached binary and rewrites the registry snapshot as empty.
/// Confirmation belongs to the caller.
#[derive(Debug, Clone)]
pub struct CacheManager {
    cache: ToolCache,
}

/// What a cache reset removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedCache {
    /// Number of tool files deleted.
    pub files_removed: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

impl CacheManager {
    /// Create a manager for the given cache.
    #[must_use]
    pub fn new(cache: ToolCache) -> Self {
        Self { cache }
    }

    /// Delete all cached tools and reset the snapshot to an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the tools directory cannot be removed or the empty
    /// snapshot cannot be written.
    pub fn clear(&self) -> Result<ClearedCache> {
        let tools_dir = self.cache.tools_dir();
        let mut cleared = ClearedCache::default();

        if tools_dir.exists() {
            for entry in walkdir::WalkDir::new(&tools_dir)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                cleared.files_removed += 1;
                cleared.bytes_freed += entry.metadata().map_or(0, |m| m.len());
            }
            std::fs::remove_dir_all(&tools_dir)
                .map_err(|e| Error::io(e, &tools_dir, "remove tool cache"))?;
        }

        paths::ensure_dir(self.cache.root())?;
        ToolRegistry::new().save_snapshot(&self.cache.snapshot_path())?;

        info!(
            root = %self.cache.root().display(),
            files = cleared.files_removed,
            bytes = cleared.bytes_freed,
            "Tool cache cleared"
        );
        Ok(cleared)
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
///
/// Leading dots are replaced too so a tool can never address `..`.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let sanitized: String = value
        .trim()
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || (c == '.' && i > 0) {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// Directory name for a tool, in the cache and in packages.
///
/// The sanitised name, suffixed with a short digest of the raw name whenever
/// sanitising changed it, so `my tool` and `my_tool` never share a directory.
#[must_use]
pub fn tool_dir_name(name: &str) -> String {
    let sanitized = sanitize_component(name);
    if sanitized == name {
        sanitized
    } else {
        let digest = sha256_hex(name.as_bytes());
        format!("{sanitized}-{}", &digest[..8])
    }
}

/// File name used for a tool inside its cache directory.
///
/// The last non-empty URL path segment (query and fragment stripped), or the
/// tool name when the URL has no usable segment.
#[must_use]
pub fn file_name_for(name: &str, url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let path = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| {
            rest.split_once('/').map_or("", |(_, path)| path)
        });

    let segment = path.rsplit('/').find(|s| !s.is_empty());
    let file = segment.map_or_else(|| sanitize_component(name), sanitize_component);
    debug!(tool = name, file = %file, "Resolved cache file name");
    file
}
