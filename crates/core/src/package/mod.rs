//! Offline package assembly.
//!
//! Layout of an assembled package:
//! ```text
//! <output>/
//! ├── artifacts/   # artifact documents, flat namespace
//! ├── tools/       # one directory per packaged tool
//! ├── scripts/     # deploy.ps1, deploy.sh
//! ├── config/      # tool_manifest.json, package.json
//! └── docs/        # README.md
//! ```
//!
//! Generated files carry no timestamps and every owned subdirectory is
//! recreated on each run, so unchanged inputs give an identical tree.

mod scripts;

pub use scripts::{POSIX_ARTIFACT_DIR, WINDOWS_ARTIFACT_DIR};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifact::ArtifactDefinition;
use crate::cache::tool_dir_name;
use crate::download::sha256_file;
use crate::paths;
use crate::registry::{DownloadStatus, ToolRegistry, write_atomic};
use crate::{Error, Result};

/// Subdirectories owned by the assembler.
pub const PACKAGE_DIRS: [&str; 5] = ["artifacts", "tools", "scripts", "config", "docs"];

/// Tool manifest, relative to the package root.
pub const MANIFEST_FILE: &str = "config/tool_manifest.json";
/// Package metadata, relative to the package root.
pub const PACKAGE_FILE: &str = "config/package.json";

/// One packaged tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Tool name.
    pub name: String,
    /// URL the binary came from.
    pub original_url: String,
    /// Binary path relative to the package root, `/`-separated.
    pub relative_local_path: String,
    /// Declared version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Declared hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// SHA-256 of the packaged binary, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Consuming artifacts.
    pub consumers: Vec<String>,
}

/// A registry tool left out of the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmittedTool {
    /// Tool name.
    pub name: String,
    /// Status at packaging time.
    pub status: DownloadStatus,
    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Contents of `config/package.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    /// Package name (output directory name).
    pub name: String,
    /// Version of the tool that built the package.
    pub generator_version: String,
    /// Artifact documents copied.
    pub artifacts: usize,
    /// Tools in the registry.
    pub tools_total: usize,
    /// Tools in the manifest.
    pub tools_packaged: usize,
    /// Whether every registry tool was packaged.
    pub complete: bool,
    /// Tools left out.
    pub omitted: Vec<OmittedTool>,
    /// Artifact documents skipped because their file name was taken.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_artifacts: Vec<PathBuf>,
}

/// An assembled package.
#[derive(Debug, Clone)]
pub struct OfflinePackage {
    /// Package root directory.
    pub root: PathBuf,
    /// Manifest entries in registry order.
    pub manifest: Vec<ManifestEntry>,
    /// Package metadata.
    pub summary: PackageSummary,
    /// Offline archive, when requested.
    pub archive: Option<PathBuf>,
    /// SHA-256 of the archive.
    pub archive_sha256: Option<String>,
}

/// Builds offline packages.
#[derive(Debug, Clone)]
pub struct PackageAssembler {
    output_dir: PathBuf,
    offline: bool,
    protected: Vec<PathBuf>,
}

impl PackageAssembler {
    /// Create an assembler for `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            offline: false,
            protected: Vec::new(),
        }
    }

    /// Refuse to assemble when an owned subdirectory would contain `path`.
    ///
    /// Artifact source documents and cached tool binaries are always
    /// protected; this adds directories such as the artifact root.
    #[must_use]
    pub fn protect(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    /// Also write a `.tar.gz` of the package next to the output directory.
    #[must_use]
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Path of the offline archive for this output directory.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        let name = package_name(&self.output_dir);
        self.output_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{name}.tar.gz"))
    }

    /// Assemble the package.
    ///
    /// Only tools with status `Downloaded` or `Cached` whose binary exists are
    /// packaged; every other tool is listed in [`PackageSummary::omitted`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error, before anything is deleted, when an
    /// owned subdirectory holds a protected input; otherwise an error on any
    /// file system failure.
    pub fn assemble(
        &self,
        artifacts: &[ArtifactDefinition],
        registry: &ToolRegistry,
    ) -> Result<OfflinePackage> {
        let root = &self.output_dir;
        paths::ensure_dir(root)?;
        self.check_inputs_outside(artifacts, registry)?;
        for dir in PACKAGE_DIRS {
            let path = root.join(dir);
            if path.exists() {
                std::fs::remove_dir_all(&path)
                    .map_err(|e| Error::io(e, &path, "remove package directory"))?;
            }
            paths::ensure_dir(&path)?;
        }

        let (copied, skipped_artifacts) = copy_artifacts(artifacts, &root.join("artifacts"))?;
        let (manifest, omitted) = copy_tools(registry, root)?;

        for tool in &omitted {
            warn!(
                tool = %tool.name,
                status = %tool.status,
                "Tool omitted from package"
            );
        }

        let summary = PackageSummary {
            name: package_name(root),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            artifacts: copied.len(),
            tools_total: registry.len(),
            tools_packaged: manifest.len(),
            complete: omitted.is_empty(),
            omitted,
            skipped_artifacts,
        };

        write_json(&root.join(MANIFEST_FILE), &manifest)?;
        write_json(&root.join(PACKAGE_FILE), &summary)?;

        write_atomic(
            &root.join("scripts").join("deploy.ps1"),
            scripts::powershell(&summary).as_bytes(),
        )?;
        let shell_path = root.join("scripts").join("deploy.sh");
        write_atomic(&shell_path, scripts::shell(&summary).as_bytes())?;
        set_executable(&shell_path)?;

        write_atomic(
            &root.join("docs").join("README.md"),
            scripts::readme(&summary, &copied, &manifest).as_bytes(),
        )?;

        let (archive, archive_sha256) = if self.offline {
            let archive = self.archive_path();
            write_archive(root, &archive)?;
            let sha = sha256_file(&archive)?;
            info!(archive = %archive.display(), sha256 = %sha, "Wrote offline archive");
            (Some(archive), Some(sha))
        } else {
            (None, None)
        };

        if !summary.complete {
            warn!(
                missing = summary.omitted.len(),
                "Package is incomplete; see config/package.json"
            );
        }
        info!(
            output = %root.display(),
            artifacts = summary.artifacts,
            tools = summary.tools_packaged,
            complete = summary.complete,
            "Assembled package"
        );

        Ok(OfflinePackage {
            root: root.clone(),
            manifest,
            summary,
            archive,
            archive_sha256,
        })
    }
}

impl PackageAssembler {
    fn check_inputs_outside(
        &self,
        artifacts: &[ArtifactDefinition],
        registry: &ToolRegistry,
    ) -> Result<()> {
        let root = resolve(&self.output_dir);
        let inputs = self
            .protected
            .iter()
            .cloned()
            .chain(artifacts.iter().map(|a| a.source_path.clone()))
            .chain(registry.iter().filter_map(|r| r.local_path.clone()));

        for input in inputs {
            let input = resolve(&input);
            if let Some(owned) = PACKAGE_DIRS
                .iter()
                .map(|dir| root.join(dir))
                .find(|owned| input.starts_with(owned))
            {
                return Err(Error::configuration(format!(
                    "Package directory {} would replace {}; choose an output directory outside the artifact source and tool cache",
                    owned.display(),
                    input.display()
                )));
            }
        }
        Ok(())
    }
}

fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn copy_artifacts(
    artifacts: &[ArtifactDefinition],
    dest: &Path,
) -> Result<(Vec<ArtifactDefinition>, Vec<PathBuf>)> {
    let mut seen = HashSet::new();
    let mut copied = Vec::new();
    let mut skipped = Vec::new();

    for artifact in artifacts {
        let Some(file_name) = artifact.file_name() else {
            skipped.push(artifact.source_path.clone());
            continue;
        };
        if !seen.insert(file_name.to_lowercase()) {
            warn!(
                artifact = %artifact.name,
                file = file_name,
                "Artifact file name already packaged; skipping"
            );
            skipped.push(artifact.source_path.clone());
            continue;
        }
        let target = dest.join(file_name);
        std::fs::copy(&artifact.source_path, &target)
            .map_err(|e| Error::io(e, &artifact.source_path, "copy artifact"))?;
        debug!(artifact = %artifact.name, "Packaged artifact");
        copied.push(artifact.clone());
    }
    Ok((copied, skipped))
}

fn copy_tools(registry: &ToolRegistry, root: &Path) -> Result<(Vec<ManifestEntry>, Vec<OmittedTool>)> {
    let mut manifest = Vec::new();
    let mut omitted = Vec::new();

    for record in registry.iter() {
        let source = record
            .local_path
            .as_ref()
            .filter(|p| record.status.is_available() && p.is_file());
        let (Some(source), Some(file_name)) = (
            source,
            source.and_then(|p| p.file_name()).and_then(|f| f.to_str()),
        ) else {
            omitted.push(OmittedTool {
                name: record.name.clone(),
                status: record.status,
                error: record.error.clone(),
            });
            continue;
        };

        let dir_name = tool_dir_name(&record.name);
        let tool_dir = root.join("tools").join(&dir_name);
        paths::ensure_dir(&tool_dir)?;
        std::fs::copy(source, tool_dir.join(file_name))
            .map_err(|e| Error::io(e, source, "copy tool"))?;

        manifest.push(ManifestEntry {
            name: record.name.clone(),
            original_url: record.url.clone(),
            relative_local_path: format!("tools/{dir_name}/{file_name}"),
            version: record.version.clone(),
            expected_hash: record.expected_hash.clone(),
            sha256: record.sha256.clone(),
            consumers: record.consumers.iter().cloned().collect(),
        });
    }
    Ok((manifest, omitted))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::serialization(format!("Failed to serialize {}: {e}", path.display())))?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::io(e, path, "set permissions"))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn package_name(root: &Path) -> String {
    root.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("package")
        .to_string()
}

/// Write the owned subdirectories of `root` as a gzip tarball with entries
/// under `<root name>/`.
///
/// Anything else in `root` (reports, stray files) stays out. Entries are
/// sorted and headers carry fixed ownership and mtime so the archive bytes
/// depend only on the tree contents.
fn write_archive(root: &Path, archive: &Path) -> Result<()> {
    let prefix = PathBuf::from(package_name(root));
    let file = File::create(archive).map_err(|e| Error::io(e, archive, "create archive"))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let tar_err = |e: std::io::Error| Error::io(e, archive, "write archive");

    let mut dirs = PACKAGE_DIRS;
    dirs.sort_unstable();
    let entries = dirs
        .iter()
        .flat_map(|dir| WalkDir::new(root.join(dir)).sort_by_file_name());

    for entry in entries {
        let entry = entry.map_err(|e| Error::configuration(format!("Failed to walk package: {e}")))?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = prefix.join(relative);

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if entry.file_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(tar_err)?;
        } else if entry.file_type().is_file() {
            let source = File::open(entry.path()).map_err(|e| Error::io(e, entry.path(), "open"))?;
            let metadata = source
                .metadata()
                .map_err(|e| Error::io(e, entry.path(), "stat"))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(file_mode(&metadata));
            header.set_size(metadata.len());
            header.set_cksum();
            builder
                .append_data(&mut header, &name, source)
                .map_err(tar_err)?;
        }
    }

    let encoder = builder.into_inner().map_err(tar_err)?;
    encoder.finish().map_err(tar_err)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 == 0 {
        0o644
    } else {
        0o755
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
