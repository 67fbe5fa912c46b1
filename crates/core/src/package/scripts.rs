//! Deployment helper scripts and the package README.

use std::fmt::Write as _;

use super::{ManifestEntry, PackageSummary};
use crate::artifact::ArtifactDefinition;

/// Default artifact directory on Windows hosts.
pub const WINDOWS_ARTIFACT_DIR: &str = r"C:\Program Files\Velociraptor\artifacts";
/// Default artifact directory on POSIX hosts.
pub const POSIX_ARTIFACT_DIR: &str = "/opt/velociraptor/artifacts";

const POWERSHELL_TEMPLATE: &str = r#"# Deploy offline package @PACKAGE@
# Artifacts: @ARTIFACTS@, tools: @TOOLS@
[CmdletBinding()]
param(
    [string]$Target = "@TARGET@",
    [switch]$InstallTools
)

$ErrorActionPreference = "Stop"
$PackageRoot = Split-Path -Parent $PSScriptRoot

if (-not (Test-Path $Target)) {
    New-Item -ItemType Directory -Force -Path $Target | Out-Null
}

Write-Host "Copying artifacts to $Target"
Copy-Item -Path (Join-Path $PackageRoot "artifacts\*") -Destination $Target -Force

if ($InstallTools) {
    $ToolsTarget = Join-Path (Split-Path -Parent $Target) "tools"
    New-Item -ItemType Directory -Force -Path $ToolsTarget | Out-Null
    Write-Host "Installing tools to $ToolsTarget"
    Copy-Item -Path (Join-Path $PackageRoot "tools\*") -Destination $ToolsTarget -Recurse -Force
}

Write-Host "Deployment complete"
"#;

const SHELL_TEMPLATE: &str = r#"#!/bin/sh
# Deploy offline package @PACKAGE@
# Artifacts: @ARTIFACTS@, tools: @TOOLS@
set -eu

TARGET="@TARGET@"
INSTALL_TOOLS=0

while [ $# -gt 0 ]; do
    case "$1" in
        --install-tools) INSTALL_TOOLS=1 ;;
        --target) shift; TARGET="$1" ;;
        -h|--help)
            echo "usage: $0 [--target DIR] [--install-tools]"
            exit 0
            ;;
        *) echo "unknown option: $1" >&2; exit 2 ;;
    esac
    shift
done

PACKAGE_ROOT="$(cd "$(dirname "$0")/.." && pwd)"

mkdir -p "$TARGET"
echo "Copying artifacts to $TARGET"
cp -f "$PACKAGE_ROOT"/artifacts/* "$TARGET"/ 2>/dev/null || true

if [ "$INSTALL_TOOLS" -eq 1 ]; then
    TOOLS_TARGET="$(dirname "$TARGET")/tools"
    mkdir -p "$TOOLS_TARGET"
    echo "Installing tools to $TOOLS_TARGET"
    cp -rf "$PACKAGE_ROOT"/tools/. "$TOOLS_TARGET"/
fi

echo "Deployment complete"
"#;

fn render(template: &str, summary: &PackageSummary, target: &str) -> String {
    template
        .replace("@PACKAGE@", &summary.name)
        .replace("@ARTIFACTS@", &summary.artifacts.to_string())
        .replace("@TOOLS@", &summary.tools_packaged.to_string())
        .replace("@TARGET@", target)
}

/// Windows deployment script.
pub(super) fn powershell(summary: &PackageSummary) -> String {
    render(POWERSHELL_TEMPLATE, summary, WINDOWS_ARTIFACT_DIR).replace('\n', "\r\n")
}

/// POSIX deployment script.
pub(super) fn shell(summary: &PackageSummary) -> String {
    render(SHELL_TEMPLATE, summary, POSIX_ARTIFACT_DIR)
}

/// Package README.
pub(super) fn readme(
    summary: &PackageSummary,
    artifacts: &[ArtifactDefinition],
    manifest: &[ManifestEntry],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", summary.name);
    let _ = writeln!(out);
    let _ = writeln!(out, "Offline artifact package.");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Artifacts: {}", summary.artifacts);
    let _ = writeln!(
        out,
        "- Tools: {} of {} packaged",
        summary.tools_packaged, summary.tools_total
    );
    let _ = writeln!(
        out,
        "- Complete: {}",
        if summary.complete { "yes" } else { "no" }
    );

    if !summary.omitted.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Missing tools");
        let _ = writeln!(out);
        for omitted in &summary.omitted {
            match &omitted.error {
                Some(error) => {
                    let _ = writeln!(out, "- `{}` ({}): {}", omitted.name, omitted.status, error);
                }
                None => {
                    let _ = writeln!(out, "- `{}` ({})", omitted.name, omitted.status);
                }
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Deployment");
    let _ = writeln!(out);
    let _ = writeln!(out, "Windows:");
    let _ = writeln!(out);
    let _ = writeln!(out, "```powershell");
    let _ = writeln!(out, r".\scripts\deploy.ps1 [-Target <dir>] [-InstallTools]");
    let _ = writeln!(out, "```");
    let _ = writeln!(out);
    let _ = writeln!(out, "Linux / macOS:");
    let _ = writeln!(out);
    let _ = writeln!(out, "```sh");
    let _ = writeln!(out, "./scripts/deploy.sh [--target <dir>] [--install-tools]");
    let _ = writeln!(out, "```");

    let _ = writeln!(out);
    let _ = writeln!(out, "## Artifacts");
    let _ = writeln!(out);
    for artifact in artifacts {
        let _ = writeln!(out, "### {}", artifact.name);
        let _ = writeln!(out);
        if let Some(description) = &artifact.description {
            let _ = writeln!(out, "{}", description.trim());
            let _ = writeln!(out);
        }
        if artifact.has_tools() {
            let _ = writeln!(out, "Tools: {}", artifact.tool_names().join(", "));
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "## Tools");
    let _ = writeln!(out);
    if manifest.is_empty() {
        let _ = writeln!(out, "No tools packaged.");
    } else {
        let _ = writeln!(out, "| Tool | Version | Consumers | Path |");
        let _ = writeln!(out, "|------|---------|-----------|------|");
        for entry in manifest {
            let _ = writeln!(
                out,
                "| {} | {} | {} | `{}` |",
                entry.name,
                entry.version.as_deref().unwrap_or("-"),
                entry.consumers.len(),
                entry.relative_local_path
            );
        }
    }
    out
}
