//! Tool-to-artifact dependency reports.
//!
//! [`ToolMappingReport::build`] derives one immutable report from a scan. The
//! JSON export and the plain-text summary are both rendered from that report,
//! so the two files can never disagree.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifact::ArtifactDefinition;
use crate::catalog::{self, CatalogEntry};
use crate::paths;
use crate::registry::{DownloadStatus, MetadataConflict, ToolRegistry, write_atomic};
use crate::{Error, Result};

/// Structured report file name.
pub const MAPPING_JSON: &str = "tool_mapping.json";
/// Plain-text summary file name.
pub const MAPPING_TEXT: &str = "tool_mapping.txt";

/// Coarse tool category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Timeline, event log and disk forensics.
    Forensics,
    /// Scanners and detection engines.
    Analysis,
    /// Memory and triage collectors.
    Collection,
    /// Script payloads.
    Scripts,
    /// Nothing matched.
    Unknown,
}

impl ToolCategory {
    /// Every category in classification priority order.
    pub const ALL: [Self; 5] = [
        Self::Forensics,
        Self::Analysis,
        Self::Collection,
        Self::Scripts,
        Self::Unknown,
    ];

    const fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Forensics => &[
                "hayabusa",
                "chainsaw",
                "volatility",
                "plaso",
                "sleuthkit",
                "autopsy",
                "evtx",
                "regripper",
                "forensic",
                "mft",
                "timeline",
            ],
            Self::Analysis => &[
                "yara",
                "capa",
                "sigma",
                "loki",
                "thor",
                "densityscout",
                "pe-sieve",
                "hollows",
                "analy",
                "scan",
            ],
            Self::Collection => &[
                "winpmem", "linpmem", "uac", "osquery", "collect", "acquire", "dump", "pmem",
            ],
            Self::Scripts => &[".ps1", ".py", ".sh", ".bat", "script", "powershell"],
            Self::Unknown => &[],
        }
    }

    /// Classify a tool by substrings of its name and URL. First match wins.
    #[must_use]
    pub fn classify(name: &str, url: &str) -> Self {
        let haystack = format!("{} {}", name, url).to_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| {
                category
                    .keywords()
                    .iter()
                    .any(|keyword| haystack.contains(keyword))
            })
            .unwrap_or(Self::Unknown)
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forensics => "forensics",
            Self::Analysis => "analysis",
            Self::Collection => "collection",
            Self::Scripts => "scripts",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingCounts {
    /// Artifacts scanned.
    pub artifacts: usize,
    /// Unique tools.
    pub tools: usize,
    /// Artifacts declaring at least one tool.
    pub artifacts_with_tools: usize,
    /// Artifacts declaring none.
    pub artifacts_without_tools: usize,
}

impl MappingCounts {
    /// Rebuild the counts from the report's own lists.
    #[must_use]
    pub fn recompute(report: &ToolMappingReport) -> Self {
        let with_tools = report
            .artifacts
            .iter()
            .filter(|a| !a.tools.is_empty())
            .count();
        Self {
            artifacts: report.artifacts.len(),
            tools: report.tools.len(),
            artifacts_with_tools: with_tools,
            artifacts_without_tools: report.artifacts.len() - with_tools,
        }
    }
}

/// Per-artifact entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Artifact name.
    pub name: String,
    /// Source document.
    pub source_path: PathBuf,
    /// Artifact type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared tool names, in document order.
    pub tools: Vec<String>,
}

/// Per-tool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    /// Tool name.
    pub name: String,
    /// Download URL.
    pub url: String,
    /// Declared version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Declared hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// Consuming artifacts.
    pub consumers: Vec<String>,
    /// `consumers.len()`.
    pub consumer_count: usize,
    /// Download status at export time.
    pub status: DownloadStatus,
    /// Cached binary, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Keyword category.
    pub category: ToolCategory,
    /// Well-known tool details, when the tool is in the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogEntry>,
}

/// Tools grouped under one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    /// Category.
    pub category: ToolCategory,
    /// Tool names in registry order.
    pub tools: Vec<String>,
}

/// A GitHub repository some tool is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReference {
    /// `owner/repo`.
    pub repository: String,
    /// Canonical repository URL.
    pub url: String,
    /// Tools fetched from it.
    pub tools: Vec<String>,
    /// Artifacts consuming those tools.
    pub consumers: Vec<String>,
}

/// A download host and the tools served from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReference {
    /// Host name.
    pub domain: String,
    /// Tools served from it.
    pub tools: Vec<String>,
}

/// Immutable dependency report derived from one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMappingReport {
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// Global counts.
    pub counts: MappingCounts,
    /// Per-artifact summaries in scan order.
    pub artifacts: Vec<ArtifactSummary>,
    /// Per-tool summaries in registry order.
    pub tools: Vec<ToolSummary>,
    /// Tool names by category.
    pub categories: Vec<CategoryGroup>,
    /// GitHub repositories referenced by tool URLs.
    pub repositories: Vec<RepositoryReference>,
    /// Download hosts.
    pub domains: Vec<DomainReference>,
    /// First-seen metadata conflicts.
    pub conflicts: Vec<MetadataConflict>,
}

impl ToolMappingReport {
    /// Build the report from scan results.
    #[must_use]
    pub fn build(artifacts: &[ArtifactDefinition], registry: &ToolRegistry) -> Self {
        let artifacts: Vec<ArtifactSummary> = artifacts
            .iter()
            .map(|a| ArtifactSummary {
                name: a.name.clone(),
                source_path: a.source_path.clone(),
                artifact_type: a.artifact_type.clone(),
                description: a.description.clone(),
                tools: a.tool_names(),
            })
            .collect();

        let tools: Vec<ToolSummary> = registry
            .iter()
            .map(|r| ToolSummary {
                name: r.name.clone(),
                url: r.url.clone(),
                version: r.version.clone(),
                expected_hash: r.expected_hash.clone(),
                consumers: r.consumers.iter().cloned().collect(),
                consumer_count: r.consumer_count(),
                status: r.status,
                local_path: r.local_path.clone(),
                category: ToolCategory::classify(&r.name, &r.url),
                catalog: catalog::lookup(&r.name, &r.url).map(catalog::KnownTool::entry),
            })
            .collect();

        let categories = ToolCategory::ALL
            .into_iter()
            .map(|category| CategoryGroup {
                category,
                tools: tools
                    .iter()
                    .filter(|t| t.category == category)
                    .map(|t| t.name.clone())
                    .collect(),
            })
            .collect();

        let mut report = Self {
            generated_at: Utc::now(),
            counts: MappingCounts::default(),
            repositories: repositories(&tools),
            domains: domains(&tools),
            categories,
            artifacts,
            tools,
            conflicts: registry.conflicts().to_vec(),
        };
        report.counts = MappingCounts::recompute(&report);
        report
    }

    /// Tool names in a category.
    #[must_use]
    pub fn tools_in(&self, category: ToolCategory) -> &[String] {
        self.categories
            .iter()
            .find(|g| g.category == category)
            .map_or(&[], |g| g.tools.as_slice())
    }

    /// Render the plain-text summary.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;
        let _ = writeln!(out, "Tool Mapping Summary");
        let _ = writeln!(out, "====================");
        let _ = writeln!(out, "Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(out, "Artifacts:               {}", c.artifacts);
        let _ = writeln!(out, "Tools:                   {}", c.tools);
        let _ = writeln!(out, "Artifacts with tools:    {}", c.artifacts_with_tools);
        let _ = writeln!(out, "Artifacts without tools: {}", c.artifacts_without_tools);

        let _ = writeln!(out);
        let _ = writeln!(out, "Tools by category");
        let _ = writeln!(out, "-----------------");
        for group in &self.categories {
            let _ = writeln!(out, "{} ({})", group.category, group.tools.len());
            for tool in &group.tools {
                let _ = writeln!(out, "  - {tool}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Tools");
        let _ = writeln!(out, "-----");
        for tool in &self.tools {
            let _ = writeln!(
                out,
                "{} [{}] {} ({} consumer{})",
                tool.name,
                tool.status,
                tool.version.as_deref().unwrap_or("-"),
                tool.consumer_count,
                if tool.consumer_count == 1 { "" } else { "s" }
            );
            let _ = writeln!(out, "  url: {}", tool.url);
            if let Some(known) = &tool.catalog {
                let _ = writeln!(
                    out,
                    "  known: {} ({} priority, {}) {}",
                    known.repository, known.priority, known.language, known.description
                );
            }
            for consumer in &tool.consumers {
                let _ = writeln!(out, "  <- {consumer}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Artifacts");
        let _ = writeln!(out, "---------");
        for artifact in &self.artifacts {
            if artifact.tools.is_empty() {
                let _ = writeln!(out, "{} (no tools)", artifact.name);
            } else {
                let _ = writeln!(out, "{}: {}", artifact.name, artifact.tools.join(", "));
            }
        }

        if !self.repositories.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "GitHub repositories");
            let _ = writeln!(out, "-------------------");
            for repo in &self.repositories {
                let _ = writeln!(out, "{} ({})", repo.repository, repo.tools.join(", "));
            }
        }

        if !self.domains.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Download hosts");
            let _ = writeln!(out, "--------------");
            for domain in &self.domains {
                let _ = writeln!(out, "{} ({} tools)", domain.domain, domain.tools.len());
            }
        }

        if !self.conflicts.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Metadata conflicts");
            let _ = writeln!(out, "------------------");
            for conflict in &self.conflicts {
                let _ = writeln!(
                    out,
                    "{}.{} in {}: kept '{}', ignored '{}'",
                    conflict.tool, conflict.field, conflict.artifact, conflict.kept, conflict.ignored
                );
            }
        }

        out
    }
}

/// Paths written by an export.
#[derive(Debug, Clone)]
pub struct ExportedMapping {
    /// The report that was written.
    pub report: ToolMappingReport,
    /// Structured report.
    pub json_path: PathBuf,
    /// Text summary.
    pub text_path: PathBuf,
}

/// Writes mapping reports into an output directory.
#[derive(Debug, Clone)]
pub struct MappingExporter {
    output_dir: PathBuf,
}

impl MappingExporter {
    /// Create an exporter writing into `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Build the report and write both files.
    ///
    /// # Errors
    ///
    /// Returns an error if the output directory cannot be created or a file
    /// cannot be written.
    pub fn export(
        &self,
        artifacts: &[ArtifactDefinition],
        registry: &ToolRegistry,
    ) -> Result<ExportedMapping> {
        let report = ToolMappingReport::build(artifacts, registry);
        paths::ensure_dir(&self.output_dir)?;

        let json_path = self.output_dir.join(MAPPING_JSON);
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::serialization(format!("Failed to serialize mapping: {e}")))?;
        write_atomic(&json_path, json.as_bytes())?;

        let text_path = self.output_dir.join(MAPPING_TEXT);
        write_atomic(&text_path, report.to_text().as_bytes())?;

        info!(
            output = %self.output_dir.display(),
            artifacts = report.counts.artifacts,
            tools = report.counts.tools,
            "Exported tool mapping"
        );
        Ok(ExportedMapping {
            report,
            json_path,
            text_path,
        })
    }

    /// Read a previously exported report.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<ToolMappingReport> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read mapping"))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::serialization(format!("Failed to parse mapping: {e}")))
    }
}

fn repositories(tools: &[ToolSummary]) -> Vec<RepositoryReference> {
    let mut repos: IndexMap<String, RepositoryReference> = IndexMap::new();
    for tool in tools {
        let Some(repository) = github_repository(&tool.url) else {
            continue;
        };
        let entry = repos
            .entry(repository.clone())
            .or_insert_with(|| RepositoryReference {
                url: format!("https://github.com/{repository}"),
                repository,
                tools: Vec::new(),
                consumers: Vec::new(),
            });
        entry.tools.push(tool.name.clone());
        for consumer in &tool.consumers {
            if !entry.consumers.contains(consumer) {
                entry.consumers.push(consumer.clone());
            }
        }
    }
    repos.into_values().collect()
}

fn domains(tools: &[ToolSummary]) -> Vec<DomainReference> {
    let mut hosts: IndexMap<String, Vec<String>> = IndexMap::new();
    for tool in tools {
        if let Some(host) = url_host(&tool.url) {
            hosts.entry(host).or_default().push(tool.name.clone());
        }
    }
    hosts
        .into_iter()
        .map(|(domain, tools)| DomainReference { domain, tools })
        .collect()
}

/// Lowercase host of an absolute URL, without userinfo or port.
#[must_use]
pub fn url_host(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// `owner/repo` for URLs on GitHub hosts.
#[must_use]
pub fn github_repository(url: &str) -> Option<String> {
    let host = url_host(url)?;
    let (_, rest) = url.split_once("://")?;
    let path = rest.split(['?', '#']).next()?;
    let mut segments = path.split('/').skip(1).filter(|s| !s.is_empty());

    let (owner, repo) = match host.as_str() {
        "github.com" | "www.github.com" | "raw.githubusercontent.com" => {
            (segments.next()?, segments.next()?)
        }
        "api.github.com" => {
            if segments.next()? != "repos" {
                return None;
            }
            (segments.next()?, segments.next()?)
        }
        _ => return None,
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some(format!("{owner}/{repo}"))
}
