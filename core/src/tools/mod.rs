//! Tool registry (spec.md §4.B). Every ingestion step and every chat step goes
//! through [`registry::ToolRegistry::dispatch`] — nothing calls a `Tool` impl
//! directly, matching the contract in spec.md's "calling a tool implementation
//! directly is a contract violation."

mod config;
mod ingest_tools;
mod qa_tools;
mod registry;
mod traits;

pub use config::{ToolConfig, VisionMode, WhisperMode};
pub use ingest_tools::deterministic_embedding;
pub use registry::{ToolRegistry, ToolRegistryLocked};
pub use traits::{Tool, ToolSpec};

use std::sync::Arc;

use crate::retriever::Retriever;
use crate::storage::Storage;
use crate::vector_index::VectorIndex;

/// Builds a registry with ten of the eleven recognized tools registered
/// (everything but `retrieval`, which needs a [`Retriever`] that itself
/// dispatches `text_embed` through this registry). Callers wire the last
/// tool in with [`register_retrieval_tool`] once the retriever exists.
///
/// `vector_index` is the same index the retriever's semantic signal searches;
/// `text_embed` stages vectors into it keyed by its own `vector_ref`, and the
/// orchestrator re-keys them by `memory_id` once a card is committed.
pub fn build_default_registry(
    storage: Storage,
    config: ToolConfig,
    vector_index: Arc<VectorIndex>,
) -> ToolRegistry {
    let config = Arc::new(config);
    let mut registry = ToolRegistry::new(storage.clone());
    registry.register(Arc::new(ingest_tools::DocParseTool::new(storage.clone(), config.clone())));
    registry.register(Arc::new(ingest_tools::OcrTool::new(storage.clone(), config.clone())));
    registry.register(Arc::new(ingest_tools::AsrTool::new(storage.clone(), config.clone())));
    registry.register(Arc::new(ingest_tools::TextEmbedTool::new(vector_index, config.clone())));
    registry.register(Arc::new(ingest_tools::VisionEmbedTool::new(storage.clone(), config.clone())));
    registry.register(Arc::new(ingest_tools::SummarizerTool::new(config.clone())));
    registry.register(Arc::new(ingest_tools::ExtractorTool::new(config.clone())));
    registry.register(Arc::new(ingest_tools::GraphBuilderTool::new()));
    registry.register(Arc::new(qa_tools::WeaverTool::new(config.clone())));
    registry.register(Arc::new(qa_tools::VerifierTool::new(config)));
    registry
}

pub async fn register_retrieval_tool(registry: &ToolRegistryLocked, retriever: Arc<Retriever>) {
    registry
        .write()
        .await
        .register(Arc::new(qa_tools::RetrievalTool::new(retriever)));
}
