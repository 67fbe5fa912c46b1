use clap::{Args, Parser, Subcommand};
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toolpack_core::download::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT};
use toolpack_core::paths::{self, CACHE_DIR_ENV};
use toolpack_core::{Operation, OperationRequest, PackConfig};

use crate::tracing::{LogLevel, TracingFormat};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Operation failure exit code
pub const EXIT_OPERATION: i32 = 3;

/// Default artifact directory.
pub const DEFAULT_ARTIFACTS: &str = "artifacts";
/// Default output directory.
pub const DEFAULT_OUTPUT: &str = "toolpack-output";

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("CLI/configuration error: {message}")]
    #[diagnostic(code(toolpack::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The operation ran and failed (exit code 3)
    #[error("Operation failed: {message}")]
    #[diagnostic(code(toolpack::cli::operation))]
    Operation {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new operation error
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            help: None,
        }
    }
}

impl From<toolpack_core::Error> for CliError {
    fn from(err: toolpack_core::Error) -> Self {
        match err {
            toolpack_core::Error::Configuration { message } => Self::config(message),
            other => Self::operation(other.to_string()),
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Operation { .. } => EXIT_OPERATION,
    }
}

/// Success response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkEnvelope<T> {
    /// Status indicator - always "ok" for success
    pub status: &'static str,
    /// The actual data payload
    pub data: T,
}

impl<T> OkEnvelope<T> {
    /// Create a new success envelope
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self { status: "ok", data }
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator - always "error" for failures
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Render error appropriately based on JSON flag
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let envelope = ErrorEnvelope::new(serde_json::json!({
            "code": match err {
                CliError::Config { .. } => "config",
                CliError::Operation { .. } => "operation",
            },
            "message": err.to_string()
        }));
        match serde_json::to_string(&envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

/// Resolve artifact tool dependencies and build offline deployment packages.
#[derive(Parser, Debug)]
#[command(name = "toolpack")]
#[command(
    about = "Resolve artifact tool dependencies and build offline deployment packages"
)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        global = true,
        default_value = "warn",
        value_enum,
        help = "Set logging level"
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long, global = true, default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    /// Emit a JSON envelope instead of the text summary.
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (defaults to ./toolpack.toml when present).
    #[arg(long, global = true, env = "TOOLPACK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan artifacts and record the tools they declare.
    Scan(PackArgs),
    /// Scan and download every declared tool.
    Download(PackArgs),
    /// Scan and write the tool mapping report.
    Map(PackArgs),
    /// Scan, download and assemble the offline package.
    Package(PackArgs),
    /// Delete every cached tool and reset the registry.
    Clean(CleanArgs),
    /// Scan, download, write the mapping and assemble the package.
    All(PackArgs),
}

impl Commands {
    /// Operation this command runs.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Scan(_) => Operation::Scan,
            Self::Download(_) => Operation::Download,
            Self::Map(_) => Operation::Map,
            Self::Package(_) => Operation::Package,
            Self::Clean(_) => Operation::Clean,
            Self::All(_) => Operation::All,
        }
    }
}

/// Options shared by every stage that scans artifacts.
#[derive(Args, Debug, Clone, Default)]
pub struct PackArgs {
    /// Artifact source directory.
    #[arg(short, long, env = "TOOLPACK_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Tool cache directory.
    #[arg(short, long, env = CACHE_DIR_ENV)]
    pub cache_dir: Option<PathBuf>,

    /// Output directory for reports and the package.
    #[arg(short, long, env = "TOOLPACK_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Artifact name patterns to include (repeatable or comma-separated).
    #[arg(short, long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Artifact name patterns to exclude (repeatable or comma-separated).
    #[arg(short = 'x', long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Maximum concurrent downloads.
    #[arg(short = 'j', long, env = "TOOLPACK_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Per-download timeout in seconds.
    #[arg(long, env = "TOOLPACK_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Validate downloaded tools against their declared hashes.
    #[arg(long)]
    pub validate_hashes: bool,

    /// Also write a .tar.gz of the package.
    #[arg(long)]
    pub offline: bool,

    /// Refetch tools even when cached.
    #[arg(long)]
    pub force: bool,
}

/// Options for `clean`.
#[derive(Args, Debug, Clone, Default)]
pub struct CleanArgs {
    /// Tool cache directory.
    #[arg(short, long, env = CACHE_DIR_ENV)]
    pub cache_dir: Option<PathBuf>,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

/// Load the explicit config file, or `./toolpack.toml` when present.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<PackConfig, CliError> {
    let config = match explicit {
        Some(path) => PackConfig::load(path).map(Some),
        None => PackConfig::discover(cwd),
    }
    .map_err(|e| CliError::config(e.to_string()))?;
    Ok(config.unwrap_or_default())
}

fn resolve_cache_dir(flag: Option<PathBuf>, config: &PackConfig) -> Result<PathBuf, CliError> {
    match flag.or_else(|| config.cache_dir.clone()) {
        Some(dir) => Ok(dir),
        None => paths::cache_dir().map_err(|e| {
            CliError::config_with_help(
                e.to_string(),
                format!("Pass --cache-dir or set {CACHE_DIR_ENV}"),
            )
        }),
    }
}

/// Build the operation request. Flags and environment beat the config file,
/// which beats built-in defaults.
pub fn build_request(command: Commands, config: &PackConfig) -> Result<OperationRequest, CliError> {
    let operation = command.operation();
    let args = match command {
        Commands::Clean(clean) => {
            let cache_dir = resolve_cache_dir(clean.cache_dir, config)?;
            return Ok(OperationRequest::new(
                operation,
                config
                    .artifacts
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS)),
                cache_dir,
                config
                    .output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            ));
        }
        Commands::Scan(args)
        | Commands::Download(args)
        | Commands::Map(args)
        | Commands::Package(args)
        | Commands::All(args) => args,
    };

    let concurrency = args
        .concurrency
        .or(config.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        return Err(CliError::config("--concurrency must be at least 1"));
    }

    let mut request = OperationRequest::new(
        operation,
        args.artifacts
            .or_else(|| config.artifacts.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS)),
        resolve_cache_dir(args.cache_dir, config)?,
        args.output
            .or_else(|| config.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
    );
    request.include = first_non_empty(args.include, &config.include, "*");
    request.exclude = if args.exclude.is_empty() {
        config.exclude.clone()
    } else {
        args.exclude
    };
    request.concurrency = concurrency;
    request.timeout = args
        .timeout
        .or(config.timeout_secs)
        .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
    request.validate_hashes = args.validate_hashes || config.validate_hashes.unwrap_or(false);
    request.offline = args.offline || config.offline.unwrap_or(false);
    request.force = args.force;
    Ok(request)
}

fn first_non_empty(flag: Vec<String>, config: &[String], fallback: &str) -> Vec<String> {
    if !flag.is_empty() {
        flag
    } else if !config.is_empty() {
        config.to_vec()
    } else {
        vec![fallback.to_string()]
    }
}

/// Parse command line arguments into a CLI structure.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
