//! Catalog of well-known incident response tools.
//!
//! Tools in the mapping report are matched against this table by name and
//! download URL so the report can show where a tool comes from and how much
//! the collection relies on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How central a tool is to typical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Part of nearly every collection.
    Critical,
    /// Commonly deployed.
    High,
    /// Situational.
    Medium,
    /// Rarely needed.
    Low,
}

impl Priority {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a catalog pattern is compared against a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    /// Anywhere in the name or URL.
    Contains(&'static str),
    /// Only as a whole word, bounded by non-alphanumeric characters.
    Word(&'static str),
}

impl Pattern {
    fn matches(self, haystack: &str) -> bool {
        match self {
            Self::Contains(needle) => haystack.contains(needle),
            Self::Word(word) => contains_word(haystack, word),
        }
    }
}

/// One catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownTool {
    /// Catalog key.
    pub key: &'static str,
    patterns: &'static [Pattern],
    /// Upstream repository.
    pub repository: &'static str,
    /// Collection priority.
    pub priority: Priority,
    /// Implementation language.
    pub language: &'static str,
    /// One-line description.
    pub description: &'static str,
}

impl KnownTool {
    fn matches(&self, haystack: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(haystack))
    }

    /// Owned copy for embedding in reports.
    #[must_use]
    pub fn entry(&self) -> CatalogEntry {
        CatalogEntry {
            key: self.key.to_string(),
            repository: self.repository.to_string(),
            priority: self.priority,
            language: self.language.to_string(),
            description: self.description.to_string(),
        }
    }
}

/// Catalog details attached to a matched tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Catalog key.
    pub key: String,
    /// Upstream repository URL.
    pub repository: String,
    /// Collection priority.
    pub priority: Priority,
    /// Implementation language.
    pub language: String,
    /// One-line description.
    pub description: String,
}

use Pattern::{Contains, Word};

/// Known tools in match order.
pub const KNOWN_TOOLS: &[KnownTool] = &[
    KnownTool {
        key: "hayabusa",
        patterns: &[Contains("hayabusa")],
        repository: "https://github.com/Yamato-Security/hayabusa",
        priority: Priority::Critical,
        language: "rust",
        description: "Windows event log fast forensics timeline generator",
    },
    KnownTool {
        key: "uac",
        patterns: &[Word("uac")],
        repository: "https://github.com/tclahr/uac",
        priority: Priority::High,
        language: "shell",
        description: "Unix-like Artifacts Collector",
    },
    KnownTool {
        key: "chainsaw",
        patterns: &[Contains("chainsaw")],
        repository: "https://github.com/countercept/chainsaw",
        priority: Priority::High,
        language: "rust",
        description: "Rapidly Search and Hunt through Windows Event Logs",
    },
    KnownTool {
        key: "sigma",
        patterns: &[Contains("sigma")],
        repository: "https://github.com/SigmaHQ/sigma",
        priority: Priority::Critical,
        language: "python",
        description: "Generic Signature Format for SIEM Systems",
    },
    KnownTool {
        key: "yara",
        patterns: &[Contains("yara")],
        repository: "https://github.com/VirusTotal/yara",
        priority: Priority::Critical,
        language: "c",
        description: "Pattern matching engine for malware research",
    },
    KnownTool {
        key: "volatility",
        patterns: &[Contains("volatility"), Contains("vol.py")],
        repository: "https://github.com/volatilityfoundation/volatility3",
        priority: Priority::Critical,
        language: "python",
        description: "Advanced memory forensics framework",
    },
    KnownTool {
        key: "plaso",
        patterns: &[Contains("plaso"), Contains("log2timeline")],
        repository: "https://github.com/log2timeline/plaso",
        priority: Priority::High,
        language: "python",
        description: "Super timeline all the things",
    },
    KnownTool {
        key: "autopsy",
        patterns: &[Contains("autopsy")],
        repository: "https://github.com/sleuthkit/autopsy",
        priority: Priority::High,
        language: "java",
        description: "Digital forensics platform",
    },
    KnownTool {
        key: "sleuthkit",
        patterns: &[Contains("sleuthkit"), Contains("tsk_")],
        repository: "https://github.com/sleuthkit/sleuthkit",
        priority: Priority::High,
        language: "c",
        description: "Library and collection of command line tools",
    },
    KnownTool {
        key: "capa",
        patterns: &[Word("capa")],
        repository: "https://github.com/mandiant/capa",
        priority: Priority::High,
        language: "python",
        description: "Automatically identify capabilities in executable files",
    },
    KnownTool {
        key: "osquery",
        patterns: &[Contains("osquery")],
        repository: "https://github.com/osquery/osquery",
        priority: Priority::High,
        language: "cpp",
        description: "SQL powered operating system instrumentation framework",
    },
    KnownTool {
        key: "regripper",
        patterns: &[Contains("regripper"), Contains("rip.pl")],
        repository: "https://github.com/keydet89/RegRipper3.0",
        priority: Priority::Medium,
        language: "perl",
        description: "Windows Registry data extraction tool",
    },
    KnownTool {
        key: "evtx",
        patterns: &[Contains("evtx")],
        repository: "https://github.com/omerbenamram/evtx",
        priority: Priority::High,
        language: "rust",
        description: "Windows XML Event Log parser",
    },
    KnownTool {
        key: "loki",
        patterns: &[Word("loki")],
        repository: "https://github.com/Neo23x0/Loki",
        priority: Priority::Medium,
        language: "python",
        description: "Simple IOC and YARA Scanner",
    },
    KnownTool {
        key: "thor",
        patterns: &[Word("thor"), Contains("thor-lite")],
        repository: "https://github.com/NextronSystems/thor-lite",
        priority: Priority::Medium,
        language: "go",
        description: "Compromise Assessment Scanner",
    },
    KnownTool {
        key: "densityscout",
        patterns: &[Contains("densityscout")],
        repository: "https://github.com/cert-ee/densityscout",
        priority: Priority::Low,
        language: "c",
        description: "Entropy analysis tool",
    },
    KnownTool {
        key: "pe-sieve",
        patterns: &[Contains("pe-sieve"), Contains("pesieve")],
        repository: "https://github.com/hasherezade/pe-sieve",
        priority: Priority::Medium,
        language: "cpp",
        description: "Scans a given process for various types of in-memory modifications",
    },
    KnownTool {
        key: "hollows_hunter",
        patterns: &[Contains("hollows_hunter"), Contains("hollows-hunter")],
        repository: "https://github.com/hasherezade/hollows_hunter",
        priority: Priority::Medium,
        language: "cpp",
        description: "Scans all running processes for various types of in-memory modifications",
    },
    KnownTool {
        key: "winpmem",
        patterns: &[Contains("winpmem")],
        repository: "https://github.com/Velocidx/WinPmem",
        priority: Priority::High,
        language: "cpp",
        description: "Windows physical memory acquisition tool",
    },
    KnownTool {
        key: "linpmem",
        patterns: &[Contains("linpmem")],
        repository: "https://github.com/Velocidx/Linpmem",
        priority: Priority::High,
        language: "cpp",
        description: "Linux physical memory acquisition tool",
    },
];

/// First catalog row matching a tool's name, then its download URL.
///
/// The name is tried on its own first so a tool called `chainsaw` hosted in
/// some other project's release page still resolves to itself.
#[must_use]
pub fn lookup(name: &str, url: &str) -> Option<&'static KnownTool> {
    let name = name.to_lowercase();
    let url = url.to_lowercase();
    KNOWN_TOOLS
        .iter()
        .find(|known| known.matches(&name))
        .or_else(|| KNOWN_TOOLS.iter().find(|known| known.matches(&url)))
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
