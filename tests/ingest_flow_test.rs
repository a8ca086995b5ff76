//! End-to-end flow: a CI-style artifact ZIP through the archive reader, the
//! report codec, and the store — plus the full ingester driven against a
//! local mock of the source-host API.

use std::io::{Read, Write};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{extract::State, routing::get, Json, Router};
use chrono::{TimeZone, Utc};
use decompd::{
    github::GitHub,
    ingest,
    models::{Commit, Project, ReportFile},
    report::{codec, Measures, Report, ReportUnit},
    storage::Storage,
    zipstream::ZipStream,
};
use serde_json::{json, Value};
use zip::write::SimpleFileOptions;

fn artifact_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file(name.to_string(), options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Walk the archive the way the ingester does and decode the first report.
fn extract_report(bytes: &[u8]) -> Option<decompd::report::Report> {
    let mut archive = ZipStream::new(bytes);
    while let Some(mut entry) = archive.next_entry().unwrap() {
        let name = entry.header().name().into_owned();
        if entry.header().is_dir() || !codec::is_report_name(&name) {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        return Some(codec::parse_report(&name, &data).unwrap());
    }
    None
}

#[tokio::test]
async fn legacy_artifact_lands_in_the_store() {
    let legacy_json = br#"{
        "total_code": 100,
        "matched_code": 50,
        "matched_code_percent": 50.0,
        "units": [{
            "name": "main.c",
            "total_code": 100,
            "matched_code": 50,
            "functions": [
                {"name": "f1", "address": "0x2A", "size": 16, "fuzzy_match_percent": 10.0},
                {"name": "f2", "address": "42", "size": 16, "fuzzy_match_percent": 20.0},
                {"name": "f3", "address": "zz", "size": 16, "fuzzy_match_percent": 30.0}
            ]
        }]
    }"#;
    let bytes = artifact_zip(&[
        ("README.md", b"not a report".as_slice()),
        ("GALE01/report.json", legacy_json.as_slice()),
    ]);

    let report = extract_report(&bytes).expect("report entry found");
    let measures = report.measures.unwrap();
    assert_eq!(measures.matched_code_percent, 50.0);
    let functions = &report.units[0].functions;
    assert_eq!(functions[0].address, Some(42));
    assert_eq!(functions[1].address, Some(42));
    assert_eq!(functions[2].address, Some(0));

    let storage = Storage::in_memory().await.unwrap();
    let file = ReportFile {
        project: Project { id: 7, owner: "org".into(), name: "repo".into() },
        commit: Commit {
            sha: "abc123".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        },
        version: "GALE01".into(),
        report,
    };
    storage.insert_report(&file).await.unwrap();

    let fetched = storage
        .get_report(7, "GALE01", "abc123")
        .await
        .unwrap()
        .expect("report present");
    assert_eq!(fetched.report, file.report);
}

#[tokio::test]
async fn binary_artifact_roundtrips() {
    use prost::Message;
    let report = decompd::report::Report {
        measures: Some(decompd::report::Measures {
            fuzzy_match_percent: 12.5,
            ..Default::default()
        }),
        units: vec![decompd::report::ReportUnit {
            name: "boot.c".into(),
            ..Default::default()
        }],
    };
    let bytes = artifact_zip(&[("out/report.binpb", report.encode_to_vec().as_slice())]);
    let parsed = extract_report(&bytes).expect("report entry found");
    assert_eq!(parsed, report);
}

#[test]
fn archives_without_reports_yield_nothing() {
    let bytes = artifact_zip(&[("maps/GALE01_maps.json", b"{}".as_slice())]);
    assert!(extract_report(&bytes).is_none());
}

// ─── Ingester against a mock source host ─────────────────────────────────────

/// Serves the two endpoints the ingester touches and counts download hits.
struct MockHost {
    downloads: AtomicUsize,
    artifact_name: String,
    expired: bool,
    artifact_zip: Vec<u8>,
}

async fn serve_mock(host: Arc<MockHost>) -> String {
    let router = Router::new()
        .route(
            "/repos/:owner/:repo/actions/runs/:run_id/artifacts",
            get(list_artifacts),
        )
        .route(
            "/repos/:owner/:repo/actions/artifacts/:artifact_id/zip",
            get(download_artifact),
        )
        .with_state(host);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn list_artifacts(State(host): State<Arc<MockHost>>) -> Json<Value> {
    Json(json!({
        "artifacts": [
            { "id": 1, "name": host.artifact_name, "expired": host.expired }
        ]
    }))
}

async fn download_artifact(State(host): State<Arc<MockHost>>) -> Vec<u8> {
    host.downloads.fetch_add(1, Ordering::SeqCst);
    host.artifact_zip.clone()
}

fn sample_report() -> Report {
    Report {
        measures: Some(Measures { total_code: 100, matched_code: 50, ..Default::default() }),
        units: vec![ReportUnit { name: "main.c".into(), ..Default::default() }],
    }
}

fn sample_commit() -> Commit {
    Commit {
        sha: "abc123".into(),
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn cache_hit_skips_artifact_download() {
    let storage = Storage::in_memory().await.unwrap();
    let project = Project { id: 7, owner: "org".into(), name: "repo".into() };
    let commit = sample_commit();
    let stored = ReportFile {
        project: project.clone(),
        commit: commit.clone(),
        version: "GALE01".into(),
        report: sample_report(),
    };
    storage.insert_report(&stored).await.unwrap();

    // The artifact is long expired upstream; the cached report must still be
    // served without touching the download endpoint.
    let host = Arc::new(MockHost {
        downloads: AtomicUsize::new(0),
        artifact_name: "GALE01_report".into(),
        expired: true,
        artifact_zip: Vec::new(),
    });
    let base = serve_mock(host.clone()).await;
    let github = GitHub::with_api_base("test-token", base).unwrap();

    let files = ingest::fetch_report_files(&github, &storage, &project, &commit, 42)
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].report, stored.report);
    assert_eq!(files[0].version, "GALE01");
    assert_eq!(
        host.downloads.load(Ordering::SeqCst),
        0,
        "cache hit must not issue a download request"
    );
}

#[tokio::test]
async fn fresh_artifact_is_downloaded_and_stored() {
    use prost::Message;
    let storage = Storage::in_memory().await.unwrap();
    let project = Project { id: 7, owner: "org".into(), name: "repo".into() };
    let commit = sample_commit();
    let report = sample_report();
    let zip = artifact_zip(&[("GALE01/report.binpb", report.encode_to_vec().as_slice())]);

    let host = Arc::new(MockHost {
        downloads: AtomicUsize::new(0),
        artifact_name: "GALE01_report".into(),
        expired: false,
        artifact_zip: zip,
    });
    let base = serve_mock(host.clone()).await;
    let github = GitHub::with_api_base("test-token", base).unwrap();

    let files = ingest::fetch_report_files(&github, &storage, &project, &commit, 42)
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].report, report);
    assert_eq!(host.downloads.load(Ordering::SeqCst), 1);
    assert!(storage.report_exists(7, "GALE01", "abc123").await.unwrap());
}

#[tokio::test]
async fn expired_artifact_without_cached_report_is_skipped() {
    let storage = Storage::in_memory().await.unwrap();
    let project = Project { id: 7, owner: "org".into(), name: "repo".into() };
    let commit = sample_commit();

    let host = Arc::new(MockHost {
        downloads: AtomicUsize::new(0),
        artifact_name: "GALE01_report".into(),
        expired: true,
        artifact_zip: Vec::new(),
    });
    let base = serve_mock(host.clone()).await;
    let github = GitHub::with_api_base("test-token", base).unwrap();

    let files = ingest::fetch_report_files(&github, &storage, &project, &commit, 42)
        .await
        .unwrap();
    assert!(files.is_empty());
    assert_eq!(host.downloads.load(Ordering::SeqCst), 0);
}
