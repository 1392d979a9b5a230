//! Axum app: shared state and route table.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use echogarden_core::graph::GraphService;
use echogarden_core::orchestrator::Orchestrator;
use echogarden_core::qa::QaOrchestrator;
use echogarden_core::queue::JobQueue;
use echogarden_core::retriever::Retriever;
use echogarden_core::storage::Storage;
use echogarden_core::tools::ToolRegistryLocked;
use echogarden_core::vector_index::VectorIndex;
use echogarden_core::watcher::Watcher;

use crate::routes;

/// Every handle a handler might need. No handler owns mutable state
/// directly — everything here is already `Clone`-cheap (`Arc`/connection
/// pool internals), matching "stateless handlers" (spec.md §4.H).
pub struct AppState {
    pub storage: Storage,
    pub registry: ToolRegistryLocked,
    pub graph: Arc<GraphService>,
    pub retriever: Arc<Retriever>,
    pub qa: Arc<QaOrchestrator>,
    pub orchestrator: Arc<Orchestrator>,
    pub vector_index: Arc<VectorIndex>,
    pub watcher: Arc<Watcher>,
    pub jobs: JobQueue,
    pub capture_api_key: Option<String>,
    pub llm_configured: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/tools", get(routes::tools::list_tools))
        .route("/tools/:name/schema", get(routes::tools::tool_schema))
        .route("/tools/:name/run", post(routes::tools::run_tool))
        .route("/ingest", post(routes::ingest::ingest_text))
        .route("/cards", get(routes::cards::list_cards))
        .route("/cards/:id", get(routes::cards::get_card))
        .route("/cards/:id/open", get(routes::cards::open_card))
        .route("/blobs/:id", get(routes::cards::stream_blob))
        .route("/retrieve", post(routes::retrieve::retrieve))
        .route("/chat", post(routes::chat::chat))
        .route("/conversations", get(routes::chat::list_conversations))
        .route("/conversations/:id", get(routes::chat::get_conversation))
        .route("/search/history", get(routes::retrieve::search_history))
        .route("/digest", get(routes::digest::digest))
        .route("/feed/today", get(routes::digest::feed_today))
        .route("/graph/upsert", post(routes::graph::upsert))
        .route("/graph/query", post(routes::graph::query_neighbors))
        .route("/graph/expand", post(routes::graph::expand))
        .route("/graph/subgraph", get(routes::graph::subgraph))
        .route("/graph/search", get(routes::graph::search))
        .route("/graph/neighbors", get(routes::graph::neighbors))
        .route("/exec/:trace_id", get(routes::exec::exec_trace))
        .route("/tool_calls", get(routes::exec::tool_calls))
        .route("/capture/status", get(routes::capture::status))
        .route("/capture/jobs", get(routes::capture::jobs))
        .route("/capture/browser/:kind", post(routes::capture::browser_capture))
        .with_state(state)
}
