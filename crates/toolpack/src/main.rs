//! toolpack CLI
//!
//! Scans artifact documents for the external tools they declare, downloads
//! those tools and assembles offline deployment packages.

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod tracing;

use crate::cli::{
    CliError, Commands, EXIT_OK, OkEnvelope, build_request, exit_code_for, load_config,
    render_error,
};
use crate::tracing::{TracingConfig, init_tracing};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use toolpack_core::{OperationResult, Pipeline};
use toolpack_tools_url::HttpToolFetcher;

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();
    let json = cli.json;

    if let Err(e) = init_tracing(&TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
    }) {
        eprintln!("{e:?}");
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            render_error(&err, json);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: cli::Cli) -> Result<i32, CliError> {
    let cwd = std::env::current_dir()
        .map_err(|e| CliError::config(format!("Cannot determine working directory: {e}")))?;
    let config = load_config(cli.config.as_deref(), &cwd)?;

    if let Commands::Clean(args) = &cli.command
        && !args.yes
        && !confirm_clean()?
    {
        println!("Aborted; cache left untouched");
        return Ok(EXIT_OK);
    }

    let request = build_request(cli.command, &config)?;
    let fetcher = HttpToolFetcher::new()?;
    let pipeline = Pipeline::new(Arc::new(fetcher));

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::operation(format!("Failed to start async runtime: {e}")))?;
    let result = runtime.block_on(pipeline.run(&request));

    if !result.success {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| "operation failed".to_string());
        return Err(match result.error_kind.as_deref() {
            Some("configuration") => CliError::config(message),
            _ => CliError::operation(message),
        });
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&OkEnvelope::new(&result))
            .map_err(|e| CliError::operation(format!("Failed to serialize result: {e}")))?;
        println!("{json}");
    } else {
        print_summary(&result);
    }
    Ok(EXIT_OK)
}

fn confirm_clean() -> Result<bool, CliError> {
    if !io::stdin().is_terminal() {
        return Err(CliError::config_with_help(
            "Refusing to clear the tool cache without confirmation",
            "Pass --yes to clear the cache non-interactively",
        ));
    }
    eprint!("Delete every cached tool and reset the registry? [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| CliError::config(format!("Failed to read confirmation: {e}")))?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_summary(result: &OperationResult) {
    let stats = &result.stats;
    println!("{} completed at {}", result.operation, result.completed_at.to_rfc3339());
    if let Some(removed) = stats.files_removed {
        println!("  cache:      {} ({removed} files removed)", result.cache_dir.display());
        return;
    }
    println!("  artifacts:  {}", stats.artifacts);
    println!("  tools:      {}", stats.tools);
    println!(
        "  downloaded: {}  cached: {}  failed: {}",
        stats.downloaded, stats.cached, stats.failed
    );
    if stats.scan_failures > 0 {
        println!("  unreadable documents: {}", stats.scan_failures);
    }
    if stats.conflicts > 0 {
        println!("  metadata conflicts:   {}", stats.conflicts);
    }
    if let Some(mapping) = &stats.mapping {
        println!("  mapping:    {}", mapping.display());
    }
    if let Some(complete) = stats.package_complete {
        println!(
            "  package:    {} ({} tools{})",
            result.output_dir.display(),
            stats.packaged,
            if complete { "" } else { ", incomplete" }
        );
    }
    if let Some(archive) = &stats.archive {
        println!("  archive:    {}", archive.display());
    }
}
