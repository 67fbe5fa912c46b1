//! Artifact definitions and the tool references they declare.
//!
//! Only the subset of the artifact document that dependency resolution needs
//! is extracted: top-level metadata plus the optional `tools` list. Every other
//! key is ignored.
//!
//! ```yaml
//! name: Windows.EventLogs.Hayabusa
//! type: CLIENT
//! author: Jane Doe
//! description: Runs hayabusa over the event logs
//! tools:
//!   - name: Hayabusa
//!     url: https://github.com/Yamato-Security/hayabusa/releases/download/v2.1.0/hayabusa.zip
//!     expected_hash: 1f2e...
//!     version: 2.1.0
//!     serve_locally: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::{Error, Result};

/// A tool dependency declared inline by an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReference {
    /// Tool name; the registry key.
    pub name: String,
    /// Download location.
    pub url: String,
    /// Declared SHA-256 of the tool content (lowercase hex, no prefix).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// Declared tool version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether the server should host the tool for clients.
    #[serde(default)]
    pub serve_locally: bool,
    /// Whether the tool is an executable (as opposed to a data file).
    #[serde(default)]
    pub is_executable: bool,
}

/// One artifact document that passed the include/exclude filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    /// Artifact name (document `name`, or the file stem when absent).
    pub name: String,
    /// Path of the source document.
    pub source_path: PathBuf,
    /// Artifact type (e.g. `CLIENT`, `SERVER`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    /// Artifact author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared tools, in document order.
    #[serde(default)]
    pub tools: Vec<ToolReference>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: Option<String>,
    #[serde(rename = "type")]
    artifact_type: Option<String>,
    author: Option<String>,
    description: Option<String>,
    tools: Option<Vec<RawTool>>,
}

#[derive(Debug, Deserialize)]
struct RawTool {
    name: Option<String>,
    url: Option<String>,
    #[serde(alias = "hash")]
    expected_hash: Option<String>,
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    serve_locally: bool,
    #[serde(default, alias = "IsExecutable")]
    is_executable: bool,
}

impl ArtifactDefinition {
    /// Read and parse an artifact document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid document.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read artifact"))?;
        Self::parse(path, &content)
    }

    /// Parse an artifact document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for empty documents, invalid YAML, or a top
    /// level that is not a mapping.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(Error::parse(path, "document is empty"));
        }

        let raw: RawDocument =
            serde_yaml::from_str(content).map_err(|e| Error::parse(path, e.to_string()))?;

        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| file_stem(path));

        let tools = raw
            .tools
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(index, tool)| tool.into_reference(&name, index))
            .collect();

        Ok(Self {
            name,
            source_path: path.to_path_buf(),
            artifact_type: non_empty(raw.artifact_type),
            author: non_empty(raw.author),
            description: non_empty(raw.description),
            tools,
        })
    }

    /// Whether the artifact declares any tool.
    #[must_use]
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Names of the declared tools, in document order.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// File name of the source document, used for the flat package namespace.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.source_path.file_name().and_then(|s| s.to_str())
    }
}

impl RawTool {
    fn into_reference(self, artifact: &str, index: usize) -> Option<ToolReference> {
        let Some(name) = non_empty(self.name) else {
            warn!(artifact, index, "Tool entry without a name, skipping");
            return None;
        };
        let Some(url) = non_empty(self.url) else {
            warn!(artifact, tool = %name, "Tool entry without a url, skipping");
            return None;
        };

        Some(ToolReference {
            name,
            url,
            expected_hash: self.expected_hash.as_deref().and_then(normalize_hash),
            version: self.version.and_then(version_string),
            serve_locally: self.serve_locally,
            is_executable: self.is_executable,
        })
    }
}

/// Normalize a declared hash: trim, drop an algorithm prefix, lowercase.
///
/// Returns `None` for empty values.
#[must_use]
pub fn normalize_hash(hash: &str) -> Option<String> {
    let trimmed = hash.trim();
    let bare = trimmed
        .split_once(':')
        .map_or(trimmed, |(_, value)| value.trim());
    if bare.is_empty() {
        None
    } else {
        Some(bare.to_ascii_lowercase())
    }
}

fn version_string(value: serde_yaml::Value) -> Option<String> {
    let version = match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    non_empty(Some(version))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string()
}
