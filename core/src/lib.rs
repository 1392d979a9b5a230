//! EchoGarden core: storage, tool registry, ingestion pipeline, graph
//! service, hybrid retriever, and Q&A orchestrator. Binaries (`echogarden-cli`)
//! and the HTTP surface (`echogarden-server`) depend on this crate and on
//! [`bootstrap`] to wire every component together the same way.

pub mod error;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod qa;
pub mod queue;
pub mod retriever;
pub mod storage;
pub mod tools;
pub mod vector_index;
pub mod watcher;

use std::sync::Arc;

use tools::{ToolConfig, ToolRegistryLocked};

/// Every long-lived component a caller needs: the database handle, the tool
/// registry (with `retrieval` already wired in), the graph service, the
/// retriever, the Q&A orchestrator, and the ingestion orchestrator. Built in
/// two phases internally because `retrieval` depends on a [`retriever::Retriever`]
/// that itself dispatches `text_embed` through the registry.
pub struct AppHandles {
    pub storage: storage::Storage,
    pub registry: ToolRegistryLocked,
    pub vector_index: Arc<vector_index::VectorIndex>,
    pub graph: Arc<graph::GraphService>,
    pub retriever: Arc<retriever::Retriever>,
    pub qa: Arc<qa::QaOrchestrator>,
    pub orchestrator: Arc<orchestrator::Orchestrator>,
}

pub struct BootstrapConfig {
    pub tool_config: ToolConfig,
    pub fusion_weights: retriever::FusionWeights,
    pub max_file_mb: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { tool_config: ToolConfig::default(), fusion_weights: retriever::FusionWeights::default(), max_file_mb: 20 }
    }
}

pub async fn bootstrap(storage: storage::Storage, config: BootstrapConfig) -> AppHandles {
    let vector_index = Arc::new(vector_index::VectorIndex::new());
    let registry = tools::build_default_registry(storage.clone(), config.tool_config, vector_index.clone());
    let locked = ToolRegistryLocked::new(registry);

    let retriever = Arc::new(retriever::Retriever::new(
        storage.clone(),
        vector_index.clone(),
        locked.clone(),
        config.fusion_weights,
    ));
    tools::register_retrieval_tool(&locked, retriever.clone()).await;

    let graph = Arc::new(graph::GraphService::new(storage.clone()));
    let qa = Arc::new(qa::QaOrchestrator::new(storage.clone(), locked.clone(), retriever.clone()));
    let orchestrator = Arc::new(orchestrator::Orchestrator::new(storage.clone(), locked.clone(), vector_index.clone(), config.max_file_mb));

    AppHandles { storage, registry: locked, vector_index, graph, retriever, qa, orchestrator }
}

/// Installs a `tracing` subscriber before any test runs, so `tracing::debug!`
/// calls in storage/orchestrator/watcher code print under `RUST_LOG=... cargo
/// test -- --nocapture` instead of being silently dropped.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer().with_filter(filter))
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_retrieval_tool_into_registry() {
        let storage = storage::Storage::open_in_memory().await.unwrap();
        let handles = bootstrap(storage, BootstrapConfig::default()).await;
        let names = handles.registry.names().await;
        assert!(names.contains(&"retrieval".to_string()));
        assert_eq!(names.len(), 11);
    }
}
