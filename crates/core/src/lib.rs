//! Artifact tool-dependency resolution and offline packaging.
//!
//! toolpack scans a directory of artifact documents for the external tools
//! they declare, keeps a deduplicated registry of those tools, downloads them
//! under a concurrency bound, reports which artifact needs which tool, and
//! assembles a self-contained package for disconnected environments.
//!
//! # Architecture
//!
//! - [`scanner`] - document discovery and registry construction
//! - [`registry`] - deduplicated tool records and the persisted snapshot
//! - [`cache`] - deterministic cache layout and cache reset
//! - [`download`] - bounded-concurrency fetching behind [`ToolFetcher`]
//! - [`mapping`] - structured and text dependency reports
//! - [`catalog`] - well-known tool details attached to the report
//! - [`package`] - offline package assembly
//! - [`operations`] - the [`Pipeline`] chaining the stages per [`Operation`]
//!
//! # Example
//!
//! ```rust,ignore
//! use toolpack_core::{Operation, OperationRequest, Pipeline};
//! use std::sync::Arc;
//!
//! let pipeline = Pipeline::new(Arc::new(fetcher));
//! let request = OperationRequest::new(Operation::All, "./artifacts", cache_dir, "./package");
//! let result = pipeline.run(&request).await;
//! assert!(result.success);
//! ```

pub mod artifact;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod download;
pub mod mapping;
pub mod operations;
pub mod package;
pub mod paths;
pub mod registry;
pub mod scanner;

mod error;

pub use artifact::{ArtifactDefinition, ToolReference};
pub use cache::{CacheManager, ClearedCache, ToolCache};
pub use catalog::{CatalogEntry, KnownTool, Priority};
pub use config::PackConfig;
pub use download::{DownloadCoordinator, DownloadOptions, DownloadSummary, ToolFetcher};
pub use error::{Error, Result};
pub use mapping::{MappingCounts, MappingExporter, ToolCategory, ToolMappingReport};
pub use operations::{Operation, OperationRequest, OperationResult, OperationStats, Pipeline};
pub use package::{ManifestEntry, OfflinePackage, PackageAssembler, PackageSummary};
pub use registry::{DownloadStatus, MetadataConflict, ToolOutcome, ToolRecord, ToolRegistry};
pub use scanner::{ArtifactScanner, ScanFailure, ScanReport};
