//! End-to-end coverage of the six concrete scenarios from spec.md §8,
//! driven straight through the axum `Router` with `tower::ServiceExt::oneshot`
//! (no real TCP listener). Each test builds its own in-memory database so
//! runs never interfere with each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use echogarden_core::queue::{spawn_workers, JobQueue, QueueConfig};
use echogarden_core::storage::Storage;
use echogarden_core::watcher::{Watcher, WatcherConfig};
use echogarden_core::{bootstrap, BootstrapConfig};
use echogarden_server::{router, AppState};

async fn build_app(watch_path: PathBuf) -> (Router, Arc<AppState>) {
    let storage = Storage::open_in_memory().await.unwrap();
    let handles = bootstrap(storage.clone(), BootstrapConfig::default()).await;
    let watcher = Arc::new(Watcher::new(
        storage.clone(),
        WatcherConfig { watch_path, poll_interval: Duration::from_millis(20), max_file_mb: 20 },
    ));

    let state = Arc::new(AppState {
        storage,
        registry: handles.registry,
        graph: handles.graph,
        retriever: handles.retriever,
        qa: handles.qa,
        orchestrator: handles.orchestrator,
        vector_index: handles.vector_index,
        watcher,
        jobs: JobQueue::new(handles.storage.clone()),
        capture_api_key: None,
        llm_configured: false,
    });
    (router(state.clone()), state)
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, parsed)
}

// 1. A note ingested via /ingest round-trips through /cards/{id} unchanged.
#[tokio::test]
async fn ingest_text_round_trips_through_cards() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = build_app(dir.path().to_path_buf()).await;

    let text = "EchoGarden is a local-first knowledge garden for personal memories.";
    let (status, body) = request(&app, "POST", "/ingest", Some(json!({"text": text}))).await;
    assert_eq!(status, StatusCode::OK);
    let memory_id = body["memory_id"].as_str().unwrap().to_string();
    assert!(!body["trace_id"].as_str().unwrap().is_empty());

    let (status, body) = request(&app, "GET", &format!("/cards/{memory_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["card"]["content_text"], text);
    assert!(!body["card"]["summary"].as_str().unwrap().is_empty());
}

// 2. Dropping the same bytes twice produces two distinct cards sharing a
// content hash but never a third job on a later scan.
#[tokio::test]
async fn duplicate_file_drop_yields_two_cards_same_hash() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = build_app(dir.path().to_path_buf()).await;

    let bytes = b"identical note dropped twice\n";
    std::fs::write(dir.path().join("a.txt"), bytes).unwrap();
    std::fs::write(dir.path().join("b.txt"), bytes).unwrap();
    state.watcher.scan_once().await.unwrap();

    let jobs = state.jobs.list_by_status(echogarden_core::model::JobStatus::Queued, 50).await.unwrap();
    assert_eq!(jobs.len(), 2, "two distinct files should enqueue two jobs even with identical bytes");

    // A second scan over the same, already-seen files must not enqueue more.
    state.watcher.scan_once().await.unwrap();
    let jobs_after = state.jobs.list_by_status(echogarden_core::model::JobStatus::Queued, 50).await.unwrap();
    assert_eq!(jobs_after.len(), 2, "rescanning unchanged files must not enqueue duplicate jobs");

    let _ = app;
}

// 3. Retrieval on overlapping vocabulary surfaces both the lexical and
// semantic signal on the same hit.
#[tokio::test]
async fn retrieve_surfaces_fts_and_semantic_reasons() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = build_app(dir.path().to_path_buf()).await;

    let text = "EchoGarden is a local-first knowledge garden for personal memories.";
    let (status, _) = request(&app, "POST", "/ingest", Some(json!({"text": text}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "POST", "/retrieve", Some(json!({"query": "knowledge garden", "top_k": 5}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["trace_id"].as_str().unwrap().is_empty());

    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    let matched = results.iter().any(|hit| {
        let reasons: Vec<&str> = hit["reasons"].as_array().unwrap().iter().filter_map(|r| r.as_str()).collect();
        reasons.contains(&"fts") && reasons.contains(&"semantic") && hit["final_score"].as_f64().unwrap() >= 0.2
    });
    assert!(matched, "expected a hit backed by both fts and semantic signals: {results:?}");
}

// 4. Chat grounded in ingested content passes and cites a memory.
#[tokio::test]
async fn chat_passes_and_cites_when_evidence_exists() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = build_app(dir.path().to_path_buf()).await;

    let (_, ingest_body) =
        request(&app, "POST", "/ingest", Some(json!({"text": "EchoGarden tracks notes about rust programming."}))).await;
    let memory_id = ingest_body["memory_id"].as_str().unwrap().to_string();

    let (status, body) = request(&app, "POST", "/chat", Some(json!({"message": "rust notes"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "pass");
    let citations = body["citations"].as_array().unwrap();
    assert!(citations.iter().any(|c| c.as_str() == Some(memory_id.as_str())));
    assert!(body["answer"].as_str().unwrap().contains(&format!("[{memory_id}]")));
}

// 5. Chat with nothing ingested abstains rather than fabricating an answer.
#[tokio::test]
async fn chat_abstains_with_no_ingested_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = build_app(dir.path().to_path_buf()).await;

    let (status, body) = request(&app, "POST", "/chat", Some(json!({"message": "what did I save about rust?"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "abstain");
    assert!(body["citations"].as_array().unwrap().is_empty());
    assert!(!body["answer"].as_str().unwrap().is_empty());
}

// 6. An image dropped into the watch directory runs the ocr/vision_embed
// branch and converges on the shared summarize/extract/embed/graph tail;
// the resulting exec trace carries every expected node in an ok state.
#[tokio::test]
async fn image_ingest_produces_full_exec_trace() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = build_app(dir.path().to_path_buf()).await;

    std::fs::write(dir.path().join("photo.png"), b"not a real png but mime is extension-based").unwrap();
    state.watcher.scan_once().await.unwrap();

    spawn_workers(
        state.storage.clone(),
        state.orchestrator.clone(),
        QueueConfig { worker_count: 1, poll_interval: Duration::from_millis(20), ..QueueConfig::default() },
    );

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut trace_id = None;
    while std::time::Instant::now() < deadline {
        let (_, body) = request(&app, "GET", "/capture/jobs?status=done", None).await;
        if let Some(job) = body["jobs"].as_array().and_then(|j| j.first()) {
            trace_id = job["trace_id"].as_str().map(str::to_string);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let trace_id = trace_id.expect("ingest_blob job for the image never completed");

    let (status, body) = request(&app, "GET", &format!("/exec/{trace_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let nodes = body["nodes"].as_array().unwrap();
    let names: Vec<&str> = nodes.iter().filter_map(|n| n["name"].as_str()).collect();
    for expected in ["ocr", "vision_embed", "summarizer", "extractor", "text_embed", "graph_builder"] {
        assert!(names.contains(&expected), "missing exec node {expected}, got {names:?}");
    }
    for node in nodes {
        assert_eq!(node["state"], "ok", "node {:?} did not finish ok", node["name"]);
    }

    let edges = body["edges"].as_array().unwrap();
    let summarizer_id = nodes.iter().find(|n| n["name"] == "summarizer").unwrap()["exec_node_id"].as_str().unwrap();
    assert!(
        edges.iter().any(|e| e["to_exec_node"] == summarizer_id),
        "expected at least one edge feeding into summarizer"
    );
}
