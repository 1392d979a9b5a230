//! Data model shared by every component: cards, blobs, graph, exec traces, jobs,
//! conversations. Plain serde types; repositories in [`crate::storage`] are the only
//! code that turns these into and out of SQLite rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Filesystem,
    Api,
    Browser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub source_type: SourceType,
    pub uri: String,
    pub created_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub blob_id: String,
    pub sha256: String,
    pub path: String,
    pub mime: String,
    pub size_bytes: i64,
    pub source_id: String,
    pub created_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,
    pub mtime_ns: i64,
    pub size_bytes: i64,
    pub sha256: String,
    pub last_seen_ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub next_run_ts: i64,
    pub payload: Value,
    pub error_text: Option<String>,
    pub trace_id: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

/// Payload for an `ingest_blob` job, per spec.md §4.C.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBlobPayload {
    pub blob_id: String,
    pub sha256: String,
    pub mime: String,
    pub size_bytes: i64,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCard {
    pub memory_id: String,
    #[serde(rename = "type")]
    pub card_type: String,
    pub source_time: i64,
    pub created_at: i64,
    pub summary: String,
    pub content_text: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Vision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub embedding_id: String,
    pub memory_id: String,
    pub modality: Modality,
    pub vector_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub node_type: String,
    pub props: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub edge_id: String,
    pub from: String,
    pub to: String,
    pub edge_type: String,
    pub weight: f64,
    pub valid_from: i64,
    pub valid_to: Option<i64>,
    pub provenance: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Ok,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecTrace {
    pub trace_id: String,
    pub started_ts: i64,
    pub finished_ts: Option<i64>,
    pub status: TraceStatus,
    pub root_call_id: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecNodeState {
    Pending,
    Running,
    Ok,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecNode {
    pub exec_node_id: String,
    pub trace_id: String,
    pub call_id: Option<String>,
    pub name: String,
    pub state: ExecNodeState,
    pub attempt: i64,
    pub timeout_ms: i64,
    pub started_ts: Option<i64>,
    pub finished_ts: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    Always,
    OnOk,
    OnError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecEdge {
    pub from_exec_node: String,
    pub to_exec_node: String,
    pub condition: EdgeCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub ts: i64,
    pub inputs: Value,
    pub outputs: Value,
    pub status: ToolCallStatus,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Revise,
    Abstain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub conversation_id: String,
    pub user_text: String,
    pub assistant_text: String,
    pub verdict: Verdict,
    pub trace_id: String,
    pub citations_json: Value,
    pub evidence_json: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCitation {
    pub citation_id: String,
    pub turn_id: String,
    pub memory_id: String,
    pub quote: String,
    pub span_start: i64,
    pub span_end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub search_id: String,
    pub query_text: String,
    pub filters: Value,
    pub result_count: i64,
    pub trace_id: Option<String>,
    pub created_at: i64,
}
