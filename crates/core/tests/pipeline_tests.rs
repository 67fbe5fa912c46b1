//! End-to-end pipeline tests against a scripted fetcher.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use toolpack_core::download::sha256_hex;
use toolpack_core::mapping::{MAPPING_JSON, MAPPING_TEXT};
use toolpack_core::package::{MANIFEST_FILE, PACKAGE_FILE};
use toolpack_core::{
    DownloadStatus, Error, ManifestEntry, MappingCounts, MappingExporter, Operation,
    OperationRequest, PackageSummary, Pipeline, Result, ToolFetcher, ToolRegistry,
};

const HAYABUSA_URL: &str = "https://github.com/Yamato-Security/hayabusa/releases/download/v2.1.0/hayabusa.zip";
const YARA_URL: &str = "https://github.com/VirusTotal/yara/releases/download/v4.3.2/yara.zip";

struct ScriptedFetcher {
    payloads: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn new(payloads: &[(&str, &[u8])]) -> Self {
        Self {
            payloads: payloads
                .iter()
                .map(|(u, b)| ((*u).to_string(), b.to_vec()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolFetcher for ScriptedFetcher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(url.to_string());
        self.payloads
            .get(url)
            .cloned()
            .ok_or_else(|| Error::download(url, "HTTP 404"))
    }
}

struct Workspace {
    _temp: TempDir,
    artifacts: std::path::PathBuf,
    cache: std::path::PathBuf,
    output: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let temp = TempDir::new().unwrap();
    let artifacts = temp.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    Workspace {
        artifacts,
        cache: temp.path().join("cache"),
        output: temp.path().join("package"),
        _temp: temp,
    }
}

fn write(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).unwrap();
}

/// Two artifacts share hayabusa; one also wants yara with a hash that will not match.
fn forensic_artifacts(dir: &Path) {
    write(
        dir,
        "hayabusa.yaml",
        &format!(
            "name: Windows.EventLogs.Hayabusa\ntype: CLIENT\ntools:\n  - name: Hayabusa\n    url: {HAYABUSA_URL}\n    expected_hash: {}\n",
            sha256_hex(b"hayabusa-bin")
        ),
    );
    write(
        dir,
        "triage.yaml",
        &format!(
            "name: Windows.Triage.Scan\ntype: CLIENT\ntools:\n  - name: Hayabusa\n    url: {HAYABUSA_URL}\n  - name: Yara\n    url: {YARA_URL}\n    expected_hash: {}\n",
            "0".repeat(64)
        ),
    );
    write(dir, "pslist.yaml", "name: Windows.System.Pslist\ntype: CLIENT\n");
}

fn request(ws: &Workspace, operation: Operation) -> OperationRequest {
    let mut request = OperationRequest::new(operation, &ws.artifacts, &ws.cache, &ws.output);
    request.validate_hashes = true;
    request
}

#[tokio::test]
async fn test_all_with_one_hash_mismatch() {
    let ws = workspace();
    forensic_artifacts(&ws.artifacts);
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        (HAYABUSA_URL, b"hayabusa-bin"),
        (YARA_URL, b"yara-bin"),
    ]));

    let result = Pipeline::new(fetcher.clone())
        .run(&request(&ws, Operation::All))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stats.artifacts, 3);
    assert_eq!(result.stats.tools, 2);
    assert_eq!(result.stats.downloaded, 1);
    assert_eq!(result.stats.failed, 1);
    assert_eq!(result.stats.packaged, 1);
    assert_eq!(result.stats.package_complete, Some(false));

    // Shared tool fetched once
    let calls = fetcher.calls();
    assert_eq!(calls.iter().filter(|u| *u == HAYABUSA_URL).count(), 1);

    let snapshot = ToolRegistry::load_snapshot(&ws.cache.join("registry.json"))
        .unwrap()
        .unwrap();
    let hayabusa = snapshot.get("Hayabusa").unwrap();
    assert_eq!(hayabusa.status, DownloadStatus::Downloaded);
    assert_eq!(hayabusa.consumer_count(), 2);
    let yara = snapshot.get("Yara").unwrap();
    assert_eq!(yara.status, DownloadStatus::Failed);
    assert!(yara.error.as_deref().unwrap().contains("mismatch"));
    assert!(yara.local_path.is_none());

    let mapping = MappingExporter::load(&ws.output.join(MAPPING_JSON)).unwrap();
    assert_eq!(mapping.counts.artifacts, 3);
    assert_eq!(mapping.counts.tools, 2);
    assert_eq!(mapping.counts.artifacts_with_tools, 2);
    assert_eq!(mapping.counts.artifacts_without_tools, 1);
    let text = std::fs::read_to_string(ws.output.join(MAPPING_TEXT)).unwrap();
    assert!(text.contains("Hayabusa"));
    assert!(text.contains("Windows.System.Pslist"));

    let manifest: Vec<ManifestEntry> =
        serde_json::from_str(&std::fs::read_to_string(ws.output.join(MANIFEST_FILE)).unwrap())
            .unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].name, "Hayabusa");
    assert_eq!(manifest[0].original_url, HAYABUSA_URL);
    assert_eq!(
        std::fs::read(ws.output.join(&manifest[0].relative_local_path)).unwrap(),
        b"hayabusa-bin"
    );

    let summary: PackageSummary =
        serde_json::from_str(&std::fs::read_to_string(ws.output.join(PACKAGE_FILE)).unwrap())
            .unwrap();
    assert!(!summary.complete);
    assert_eq!(summary.omitted.len(), 1);
    assert_eq!(summary.omitted[0].name, "Yara");
}

#[tokio::test]
async fn test_second_run_uses_cache() {
    let ws = workspace();
    forensic_artifacts(&ws.artifacts);
    let payloads: &[(&str, &[u8])] = &[(HAYABUSA_URL, b"hayabusa-bin"), (YARA_URL, b"yara-bin")];

    let first = Pipeline::new(Arc::new(ScriptedFetcher::new(payloads)))
        .run(&request(&ws, Operation::Download))
        .await;
    assert!(first.success);
    assert_eq!(first.stats.downloaded, 1);

    let fetcher = Arc::new(ScriptedFetcher::new(payloads));
    let second = Pipeline::new(fetcher.clone())
        .run(&request(&ws, Operation::Download))
        .await;
    assert!(second.success);
    assert_eq!(second.stats.cached, 1);
    assert_eq!(second.stats.downloaded, 0);
    // Only the failed tool is retried
    assert_eq!(fetcher.calls(), vec![YARA_URL.to_string()]);
}

#[tokio::test]
async fn test_empty_directory() {
    let ws = workspace();
    let fetcher = Arc::new(ScriptedFetcher::new(&[]));

    let result = Pipeline::new(fetcher.clone())
        .run(&request(&ws, Operation::All))
        .await;

    assert!(result.success);
    assert_eq!(result.stats.artifacts, 0);
    assert_eq!(result.stats.tools, 0);
    assert_eq!(result.stats.packaged, 0);
    assert_eq!(result.stats.package_complete, Some(true));
    assert!(fetcher.calls().is_empty());

    let mapping = MappingExporter::load(&ws.output.join(MAPPING_JSON)).unwrap();
    assert_eq!(mapping.counts, MappingCounts::default());
}

#[tokio::test]
async fn test_map_counts_match_lists() {
    let ws = workspace();
    forensic_artifacts(&ws.artifacts);

    let result = Pipeline::new(Arc::new(ScriptedFetcher::new(&[])))
        .run(&request(&ws, Operation::Map))
        .await;
    assert!(result.success);

    let mapping = MappingExporter::load(result.stats.mapping.as_deref().unwrap()).unwrap();
    assert_eq!(mapping.counts, MappingCounts::recompute(&mapping));
    assert!(
        mapping
            .tools
            .iter()
            .all(|t| t.status == DownloadStatus::Pending)
    );
}

#[tokio::test]
async fn test_exclude_filter_drops_artifacts() {
    let ws = workspace();
    forensic_artifacts(&ws.artifacts);
    let mut req = request(&ws, Operation::Scan);
    req.exclude = vec!["*triage*".to_string()];

    let result = Pipeline::new(Arc::new(ScriptedFetcher::new(&[])))
        .run(&req)
        .await;

    assert!(result.success);
    assert_eq!(result.stats.artifacts, 2);
    assert_eq!(result.stats.tools, 1);
}

#[tokio::test]
async fn test_complete_package_manifest_points_at_files() {
    let ws = workspace();
    for i in 0..5 {
        write(
            &ws.artifacts,
            &format!("a{i}.yaml"),
            &format!("name: Artifact.{i}\ntools:\n  - name: tool{i}\n    url: https://dl.example.com/tool{i}.exe\n    is_executable: true\n"),
        );
    }
    let urls: Vec<String> = (0..5)
        .map(|i| format!("https://dl.example.com/tool{i}.exe"))
        .collect();
    let payloads: Vec<(&str, &[u8])> = urls.iter().map(|u| (u.as_str(), &b"bin"[..])).collect();

    let result = Pipeline::new(Arc::new(ScriptedFetcher::new(&payloads)))
        .run(&request(&ws, Operation::Package))
        .await;

    assert!(result.success);
    assert_eq!(result.stats.package_complete, Some(true));
    let manifest: Vec<ManifestEntry> =
        serde_json::from_str(&std::fs::read_to_string(ws.output.join(MANIFEST_FILE)).unwrap())
            .unwrap();
    assert_eq!(manifest.len(), 5);
    for entry in &manifest {
        assert!(ws.output.join(&entry.relative_local_path).is_file());
    }
    for i in 0..5 {
        assert!(ws.output.join(format!("artifacts/a{i}.yaml")).is_file());
    }
}

#[tokio::test]
async fn test_package_refuses_output_over_artifact_sources() {
    let ws = workspace();
    forensic_artifacts(&ws.artifacts);
    let fetcher = Arc::new(ScriptedFetcher::new(&[(HAYABUSA_URL, b"hayabusa-bin")]));

    // The package's own artifacts/ directory would be the source directory
    let parent = ws.artifacts.parent().unwrap().to_path_buf();
    let mut request = request(&ws, Operation::Package);
    request.output_dir = parent;

    let result = Pipeline::new(fetcher).run(&request).await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("configuration"));
    assert!(result.error.unwrap().contains("would replace"));
    for doc in ["hayabusa.yaml", "triage.yaml", "pslist.yaml"] {
        assert!(ws.artifacts.join(doc).is_file(), "{doc} was removed");
    }
}

#[tokio::test]
async fn test_tools_with_colliding_sanitised_names_stay_apart() {
    let ws = workspace();
    write(
        &ws.artifacts,
        "spaced.yaml",
        "name: Spaced\ntools:\n  - name: my tool\n    url: https://one.example/tool.exe\n",
    );
    write(
        &ws.artifacts,
        "underscored.yaml",
        "name: Underscored\ntools:\n  - name: my_tool\n    url: https://two.example/tool.exe\n",
    );
    let fetcher = Arc::new(ScriptedFetcher::new(&[
        ("https://one.example/tool.exe", b"first"),
        ("https://two.example/tool.exe", b"second"),
    ]));

    let result = Pipeline::new(fetcher)
        .run(&request(&ws, Operation::Package))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stats.packaged, 2);
    let manifest: Vec<ManifestEntry> =
        serde_json::from_str(&std::fs::read_to_string(ws.output.join(MANIFEST_FILE)).unwrap())
            .unwrap();
    assert_ne!(
        manifest[0].relative_local_path,
        manifest[1].relative_local_path
    );
    for entry in &manifest {
        let expected: &[u8] = if entry.name == "my tool" { b"first" } else { b"second" };
        let packaged = std::fs::read(ws.output.join(&entry.relative_local_path)).unwrap();
        assert_eq!(packaged, expected, "{}", entry.name);
    }
}

#[tokio::test]
async fn test_cached_tools_keep_their_checksum_in_the_manifest() {
    let ws = workspace();
    forensic_artifacts(&ws.artifacts);
    let fetcher = Arc::new(ScriptedFetcher::new(&[(HAYABUSA_URL, b"hayabusa-bin")]));
    let pipeline = Pipeline::new(fetcher);

    let first = pipeline.run(&request(&ws, Operation::Package)).await;
    assert!(first.success, "{:?}", first.error);
    let second = pipeline.run(&request(&ws, Operation::Package)).await;
    assert!(second.success, "{:?}", second.error);
    assert_eq!(second.stats.cached, 1);

    let manifest: Vec<ManifestEntry> =
        serde_json::from_str(&std::fs::read_to_string(ws.output.join(MANIFEST_FILE)).unwrap())
            .unwrap();
    let hayabusa = manifest.iter().find(|e| e.name == "Hayabusa").unwrap();
    assert_eq!(hayabusa.sha256.as_deref(), Some(sha256_hex(b"hayabusa-bin").as_str()));
}
