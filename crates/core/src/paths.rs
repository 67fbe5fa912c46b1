//! Default locations for toolpack data.
//!
//! | Platform | Cache Dir |
//! |----------|-----------|
//! | **macOS** | `~/Library/Caches/toolpack` |
//! | **Linux** | `~/.cache/toolpack` (XDG_CACHE_HOME) |
//! | **Windows** | `%LOCALAPPDATA%\toolpack` |
//!
//! `TOOLPACK_CACHE_DIR` overrides the cache directory for testing and CI.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "TOOLPACK_CACHE_DIR";

/// File name of the persisted registry snapshot inside the cache root.
pub const SNAPSHOT_FILE: &str = "registry.json";

/// Directory (inside the cache root) holding downloaded tool binaries.
pub const TOOLS_DIR: &str = "tools";

/// Get the cache directory for toolpack.
///
/// Resolution order:
/// 1. `TOOLPACK_CACHE_DIR` environment variable
/// 2. Platform cache directory + `/toolpack`
///
/// # Errors
///
/// Returns an error if the cache directory cannot be determined.
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    let base = dirs::cache_dir()
        .ok_or_else(|| Error::configuration("Could not determine cache directory"))?;

    Ok(base.join("toolpack"))
}

/// Path of the registry snapshot under a cache root.
#[must_use]
pub fn snapshot_path(cache_root: &Path) -> PathBuf {
    cache_root.join(SNAPSHOT_FILE)
}

/// Ensure a directory exists, creating parents as needed.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io(e, path, "create directory"))
}
