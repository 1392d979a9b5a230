//! `/capture/*` routes (spec.md §4.C, §6): watcher status, job inspection,
//! and the browser-extension capture surface authenticated by `X-EG-Key`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use echogarden_core::error::ApiError;
use echogarden_core::model::JobStatus;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.watcher.config();
    let counts = state.watcher.counts();
    Json(json!({
        "watch_path": config.watch_path,
        "poll_interval_s": config.poll_interval.as_secs(),
        "max_file_mb": config.max_file_mb,
        "files_seen": counts.files_seen,
        "jobs_enqueued": counts.jobs_enqueued,
        "scans_completed": counts.scans_completed,
    }))
}

#[derive(Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

fn parse_status(s: &str) -> Result<JobStatus, ApiError> {
    match s {
        "queued" => Ok(JobStatus::Queued),
        "running" => Ok(JobStatus::Running),
        "done" => Ok(JobStatus::Done),
        "error" => Ok(JobStatus::Error),
        "dead" => Ok(JobStatus::Dead),
        other => Err(ApiError::InvalidInput(format!("unknown job status '{other}'"))),
    }
}

pub async fn jobs(State(state): State<Arc<AppState>>, Query(q): Query<JobsQuery>) -> ApiResult<Json<Value>> {
    let status = parse_status(q.status.as_deref().unwrap_or("queued"))?;
    let jobs = state.jobs.list_by_status(status, q.limit.unwrap_or(50).clamp(1, 500)).await?;
    Ok(Json(json!({"jobs": jobs})))
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.capture_api_key else {
        return Ok(());
    };
    let got = headers.get("x-eg-key").and_then(|v| v.to_str().ok());
    if got == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
pub struct BrowserCaptureRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    /// Batch payload for `import_history`: one entry per visited page.
    #[serde(default)]
    entries: Option<Vec<HistoryEntry>>,
}

fn capture_metadata(kind: &str, url: Option<&str>, title: Option<&str>, metadata: Option<Value>) -> Value {
    let mut metadata = metadata.unwrap_or_else(|| json!({}));
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("source_type".to_string(), json!("browser"));
        obj.insert("capture_kind".to_string(), json!(kind));
        if let Some(url) = url {
            obj.insert("url".to_string(), json!(url));
        }
        if let Some(title) = title {
            obj.insert("title".to_string(), json!(title));
        }
    }
    metadata
}

/// One `memory_card` per highlight/bookmark/visit, or a batch of import jobs
/// (one per `entries` item, returning a count) for `import_history`
/// (spec.md §4.C capture kinds, §6 `/capture/browser/*` output).
pub async fn browser_capture(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(req): Json<BrowserCaptureRequest>,
) -> ApiResult<Json<Value>> {
    check_api_key(&state, &headers)?;

    let card_type = match kind.as_str() {
        "highlight" => "highlight",
        "bookmark" => "bookmark",
        "research_session" => "research_session",
        "visit" => "visit",
        "import_history" => "visit",
        other => return Err(ApiError::InvalidInput(format!("unknown capture kind '{other}'")).into()),
    };

    if kind == "import_history" {
        let entries = req.entries.ok_or_else(|| ApiError::InvalidInput("entries is required for import_history".to_string()))?;
        let mut count = 0i64;
        for entry in entries {
            let Some(text) = entry.text.clone().or_else(|| entry.title.clone()).filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            let metadata = capture_metadata(&kind, entry.url.as_deref(), entry.title.as_deref(), entry.metadata);
            state.orchestrator.ingest_text(&text, card_type, metadata).await?;
            count += 1;
        }
        return Ok(Json(json!({"count": count})));
    }

    let text = req
        .text
        .clone()
        .or_else(|| req.title.clone())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidInput("text or title is required".to_string()))?;

    let metadata = capture_metadata(&kind, req.url.as_deref(), req.title.as_deref(), req.metadata.clone());

    let (memory_id, trace_id) = state.orchestrator.ingest_text(&text, card_type, metadata).await?;
    Ok(Json(json!({"memory_id": memory_id, "trace_id": trace_id})))
}
