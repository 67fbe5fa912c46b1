//! Error types for toolpack core operations

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for toolpack operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading documents, writing the cache or the package
    #[error("I/O {operation} failed: {}", path.display())]
    #[diagnostic(
        code(toolpack::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error
        path: Box<Path>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(toolpack::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// An artifact document could not be parsed
    #[error("Failed to parse artifact document {}: {message}", path.display())]
    #[diagnostic(
        code(toolpack::parse),
        help("Artifact documents must be YAML mappings with an optional `tools` list")
    )]
    Parse {
        /// Document that failed to parse
        path: Box<Path>,
        /// Parser message
        message: String,
    },

    /// Serialization error for snapshots, manifests and reports
    #[error("Serialization error: {message}")]
    #[diagnostic(code(toolpack::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Fetching a tool failed
    #[error("Failed to download '{tool}': {message}")]
    #[diagnostic(code(toolpack::download))]
    Download {
        /// Tool name
        tool: String,
        /// Transport or status message
        message: String,
    },

    /// Fetched content did not match the declared hash
    #[error("Hash mismatch for '{tool}': expected {expected}, got {actual}")]
    #[diagnostic(
        code(toolpack::hash_mismatch),
        help("The upstream file changed or the declared expected_hash is wrong")
    )]
    HashMismatch {
        /// Tool name
        tool: String,
        /// Declared hash
        expected: String,
        /// Computed hash
        actual: String,
    },

    /// A download exceeded its time budget
    #[error("Download of '{tool}' timed out after {seconds}s")]
    #[diagnostic(code(toolpack::timeout))]
    Timeout {
        /// Tool name
        tool: String,
        /// Configured timeout in seconds
        seconds: u64,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: path.as_ref().into(),
            operation: operation.into(),
        }
    }

    /// Create a document parse error
    #[must_use]
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a download error
    #[must_use]
    pub fn download(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a hash mismatch error
    #[must_use]
    pub fn hash_mismatch(
        tool: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            tool: tool.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(tool: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            seconds,
        }
    }

    /// Short machine-readable category of the error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Configuration { .. } => "configuration",
            Self::Parse { .. } => "parse",
            Self::Serialization { .. } => "serialization",
            Self::Download { .. } => "download",
            Self::HashMismatch { .. } => "hash_mismatch",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Result type for toolpack operations
pub type Result<T> = std::result::Result<T, Error>;
