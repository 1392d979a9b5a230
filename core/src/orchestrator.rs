//! Ingestion orchestrator (spec.md §4.D). The heart of ingestion: routes a
//! blob to a pipeline, dispatches each step through the tool registry,
//! records the execution DAG as it goes, and commits a MemoryCard. Grounded
//! on the Design Note in spec.md §9 ("build it as a small DAG runner that
//! takes `[(name, dependsOn)]`") rather than the teacher's `StateGraph`,
//! which solves a different problem (in-process typed-state agent steps).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::OrchestratorError;
use crate::model::{
    new_id, now_ts, Embedding, ExecEdge, ExecNode, ExecNodeState, ExecTrace, GraphEdge,
    GraphNode, IngestBlobPayload, Job, MemoryCard, Modality, TraceStatus,
};
use crate::storage::Storage;
use crate::tools::ToolRegistryLocked;
use crate::vector_index::VectorIndex;

const DEFAULT_TIMEOUT_MS: i64 = 30_000;

const DOC_MIME_PREFIXES: &[&str] = &["text/"];
const DOC_MIME_EXACT: &[&str] = &[
    "application/pdf",
    "application/json",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/csv",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Doc,
    Image,
    Audio,
    Placeholder,
}

fn classify(mime: &str) -> PipelineKind {
    if mime.starts_with("image/") {
        PipelineKind::Image
    } else if mime.starts_with("audio/") {
        PipelineKind::Audio
    } else if DOC_MIME_PREFIXES.iter().any(|p| mime.starts_with(p)) || DOC_MIME_EXACT.contains(&mime) {
        PipelineKind::Doc
    } else {
        PipelineKind::Placeholder
    }
}

fn pipeline_tag(kind: PipelineKind) -> &'static str {
    match kind {
        PipelineKind::Doc => "doc",
        PipelineKind::Image => "ocr",
        PipelineKind::Audio => "asr",
        PipelineKind::Placeholder => "placeholder",
    }
}

/// A single tool dispatch plus its exec-graph bookkeeping.
struct Run<'a> {
    storage: &'a Storage,
    registry: &'a ToolRegistryLocked,
    trace_id: String,
}

impl<'a> Run<'a> {
    /// Dispatches `tool_name(input)`, recording an ExecNode and wiring an
    /// on_ok/on_error edge from every predecessor in `after`.
    async fn step(&self, tool_name: &str, input: Value, after: &[String]) -> Result<(Value, String), OrchestratorError> {
        let exec_node_id = new_id();
        let started = now_ts();
        self.storage
            .insert_exec_node(ExecNode {
                exec_node_id: exec_node_id.clone(),
                trace_id: self.trace_id.clone(),
                call_id: None,
                name: tool_name.to_string(),
                state: ExecNodeState::Running,
                attempt: 1,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                started_ts: Some(started),
                finished_ts: None,
            })
            .await?;

        let result = self.registry.dispatch(tool_name, input, Some(&self.trace_id)).await;
        let finished = now_ts();

        match result {
            Ok(output) => {
                self.storage
                    .update_exec_node_state(&exec_node_id, ExecNodeState::Ok, None, Some(finished))
                    .await?;
                for pred in after {
                    self.storage
                        .insert_exec_edge(ExecEdge {
                            from_exec_node: pred.clone(),
                            to_exec_node: exec_node_id.clone(),
                            condition: crate::model::EdgeCondition::OnOk,
                        })
                        .await?;
                }
                Ok((output, exec_node_id))
            }
            Err(e) => {
                self.storage
                    .update_exec_node_state(&exec_node_id, ExecNodeState::Error, None, Some(finished))
                    .await?;
                for pred in after {
                    self.storage
                        .insert_exec_edge(ExecEdge {
                            from_exec_node: pred.clone(),
                            to_exec_node: exec_node_id.clone(),
                            condition: crate::model::EdgeCondition::OnError,
                        })
                        .await?;
                }
                Err(OrchestratorError::from(e))
            }
        }
    }
}

pub struct Orchestrator {
    storage: Storage,
    registry: ToolRegistryLocked,
    vector_index: Arc<VectorIndex>,
    max_file_mb: u64,
}

impl Orchestrator {
    pub fn new(storage: Storage, registry: ToolRegistryLocked, vector_index: Arc<VectorIndex>, max_file_mb: u64) -> Self {
        Self { storage, registry, vector_index, max_file_mb }
    }

    /// Runs one `ingest_blob` job to completion or failure. The caller (the
    /// queue worker) is responsible for `complete_job`/`fail_job`.
    ///
    /// Only the first attempt (`job.attempts == 0`) reuses the watcher-minted
    /// `payload.trace_id`; every retry mints a fresh trace, so a failed
    /// attempt's partial exec graph never gets nodes appended to it.
    pub async fn process_ingest_job(&self, job: &Job) -> Result<String, OrchestratorError> {
        let payload: IngestBlobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| OrchestratorError::Unroutable(format!("bad ingest_blob payload: {e}")))?;
        let trace_id = if job.attempts == 0 { payload.trace_id.clone() } else { new_id() };

        if let Some(existing) = self.storage.find_card_by_blob_and_trace(&payload.blob_id, &trace_id).await? {
            return Ok(existing.memory_id);
        }

        self.storage
            .insert_trace(ExecTrace {
                trace_id: trace_id.clone(),
                started_ts: now_ts(),
                finished_ts: None,
                status: TraceStatus::Running,
                root_call_id: None,
                metadata: json!({"blob_id": payload.blob_id, "job_id": job.job_id}),
            })
            .await?;

        let result = self.run_pipeline(&payload, &trace_id).await;

        match &result {
            Ok(_) => {
                self.storage.finish_trace(&trace_id, TraceStatus::Ok, now_ts()).await?;
            }
            Err(_) => {
                self.storage.finish_trace(&trace_id, TraceStatus::Error, now_ts()).await?;
            }
        }
        result
    }

    async fn run_pipeline(&self, payload: &IngestBlobPayload, trace_id: &str) -> Result<String, OrchestratorError> {
        let run = Run { storage: &self.storage, registry: &self.registry, trace_id: trace_id.to_string() };
        let oversize = payload.size_bytes > (self.max_file_mb as i64) * 1_000_000;
        let kind = if oversize { PipelineKind::Placeholder } else { classify(&payload.mime) };

        if kind == PipelineKind::Placeholder {
            return self.commit_placeholder(payload, trace_id, if oversize { "oversize" } else { "unsupported_mime" }).await;
        }

        let blob_input = json!({"blob_id": payload.blob_id});
        let (content_text, entities_input) = match kind {
            PipelineKind::Doc => {
                let (out, node) = run.step("doc_parse", blob_input.clone(), &[]).await?;
                let text = out.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                (text, vec![node])
            }
            PipelineKind::Image => {
                let (ocr_out, ocr_node) = run.step("ocr", blob_input.clone(), &[]).await?;
                let (_, vision_node) = run.step("vision_embed", blob_input.clone(), &[]).await?;
                let text = ocr_out.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                (text, vec![ocr_node, vision_node])
            }
            PipelineKind::Audio => {
                let (out, node) = run.step("asr", blob_input.clone(), &[]).await?;
                let text = out.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                (text, vec![node])
            }
            PipelineKind::Placeholder => unreachable!(),
        };

        let (summary_out, summarizer_node) =
            run.step("summarizer", json!({"text": content_text}), &entities_input).await?;
        let summary = summary_out.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        let (extractor_out, extractor_node) =
            run.step("extractor", json!({"text": content_text}), std::slice::from_ref(&summarizer_node)).await?;

        let (embed_out, embed_node) =
            run.step("text_embed", json!({"text": content_text}), std::slice::from_ref(&extractor_node)).await?;
        let vector_ref = embed_out.get("vector_ref").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        let memory_id = new_id();

        let (graph_out, _graph_node) = run
            .step(
                "graph_builder",
                json!({"memory_id": memory_id, "entities": extractor_out.get("entities").cloned().unwrap_or(json!([]))}),
                std::slice::from_ref(&embed_node),
            )
            .await?;

        self.commit(payload, trace_id, kind, &memory_id, &summary, &content_text, &extractor_out, &vector_ref, &graph_out)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        payload: &IngestBlobPayload,
        trace_id: &str,
        kind: PipelineKind,
        memory_id: &str,
        summary: &str,
        content_text: &str,
        extractor_out: &Value,
        vector_ref: &str,
        graph_out: &Value,
    ) -> Result<String, OrchestratorError> {
        let now = now_ts();
        let card = MemoryCard {
            memory_id: memory_id.to_string(),
            card_type: "document".to_string(),
            source_time: now,
            created_at: now,
            summary: summary.to_string(),
            content_text: content_text.to_string(),
            metadata: json!({
                "mime": payload.mime,
                "pipeline": pipeline_tag(kind),
                "blob_id": payload.blob_id,
                "entities": extractor_out.get("entities").cloned().unwrap_or(json!([])),
                "tags": extractor_out.get("tags").cloned().unwrap_or(json!([])),
                "actions": extractor_out.get("actions").cloned().unwrap_or(json!([])),
            }),
        };
        self.storage.upsert_card(card, Some(payload.blob_id.clone()), Some(trace_id.to_string())).await?;

        if let Some(vector) = self.vector_index.get(vector_ref) {
            self.vector_index.upsert(memory_id.to_string(), vector);
            self.vector_index.remove(vector_ref);
            self.storage
                .insert_embedding(Embedding {
                    embedding_id: new_id(),
                    memory_id: memory_id.to_string(),
                    modality: Modality::Text,
                    vector_ref: memory_id.to_string(),
                })
                .await?;
        }

        self.storage
            .upsert_node(GraphNode { node_id: format!("mem:{memory_id}"), node_type: "memory".to_string(), props: json!({"label": summary}) })
            .await?;

        if let Some(nodes) = graph_out.get("nodes").and_then(|v| v.as_array()) {
            for n in nodes {
                let node_id = n.get("node_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                if node_id.is_empty() {
                    continue;
                }
                self.storage
                    .upsert_node(GraphNode {
                        node_id,
                        node_type: n.get("node_type").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
                        props: n.get("props").cloned().unwrap_or(json!({})),
                    })
                    .await?;
            }
        }
        if let Some(edges) = graph_out.get("edges").and_then(|v| v.as_array()) {
            for e in edges {
                let edge_id = e.get("edge_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                if edge_id.is_empty() {
                    continue;
                }
                self.storage
                    .upsert_edge(GraphEdge {
                        edge_id,
                        from: e.get("from").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        to: e.get("to").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        edge_type: e.get("edge_type").and_then(|v| v.as_str()).unwrap_or("RELATED").to_string(),
                        weight: e.get("weight").and_then(|v| v.as_f64()).unwrap_or(0.5),
                        valid_from: now,
                        valid_to: None,
                        provenance: json!({"trace_id": trace_id}),
                    })
                    .await?;
            }
        }

        Ok(memory_id.to_string())
    }

    /// Ingests text handed directly to the HTTP surface (`/ingest`,
    /// `/capture/browser/*`) rather than discovered by the watcher — no
    /// blob, so the doc pipeline's tail (summarize/extract/embed/graph) runs
    /// against the given text and the resulting card carries `card_type`
    /// and whatever caller-supplied `metadata` is merged in.
    pub async fn ingest_text(&self, text: &str, card_type: &str, mut metadata: Value) -> Result<(String, String), OrchestratorError> {
        let trace_id = new_id();
        self.storage
            .insert_trace(ExecTrace {
                trace_id: trace_id.clone(),
                started_ts: now_ts(),
                finished_ts: None,
                status: TraceStatus::Running,
                root_call_id: None,
                metadata: json!({"card_type": card_type}),
            })
            .await?;

        let run = Run { storage: &self.storage, registry: &self.registry, trace_id: trace_id.clone() };
        let result: Result<String, OrchestratorError> = async {
            let (summary_out, summarizer_node) = run.step("summarizer", json!({"text": text}), &[]).await?;
            let summary = summary_out.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();

            let (extractor_out, extractor_node) =
                run.step("extractor", json!({"text": text}), std::slice::from_ref(&summarizer_node)).await?;

            let (embed_out, embed_node) =
                run.step("text_embed", json!({"text": text}), std::slice::from_ref(&extractor_node)).await?;
            let vector_ref = embed_out.get("vector_ref").and_then(|v| v.as_str()).unwrap_or_default().to_string();

            let memory_id = new_id();
            let (graph_out, _graph_node) = run
                .step(
                    "graph_builder",
                    json!({"memory_id": memory_id, "entities": extractor_out.get("entities").cloned().unwrap_or(json!([]))}),
                    std::slice::from_ref(&embed_node),
                )
                .await?;

            if let Some(obj) = metadata.as_object_mut() {
                obj.insert("pipeline".to_string(), json!("direct"));
                obj.insert("entities".to_string(), extractor_out.get("entities").cloned().unwrap_or(json!([])));
                obj.insert("tags".to_string(), extractor_out.get("tags").cloned().unwrap_or(json!([])));
                obj.insert("actions".to_string(), extractor_out.get("actions").cloned().unwrap_or(json!([])));
            }
            let now = now_ts();
            let label = summary.clone();
            let card = MemoryCard {
                memory_id: memory_id.clone(),
                card_type: card_type.to_string(),
                source_time: now,
                created_at: now,
                summary,
                content_text: text.to_string(),
                metadata,
            };
            self.storage.upsert_card(card, None, Some(trace_id.clone())).await?;

            if let Some(vector) = self.vector_index.get(&vector_ref) {
                self.vector_index.upsert(memory_id.clone(), vector);
                self.vector_index.remove(&vector_ref);
                self.storage
                    .insert_embedding(Embedding { embedding_id: new_id(), memory_id: memory_id.clone(), modality: Modality::Text, vector_ref: memory_id.clone() })
                    .await?;
            }

            self.storage
                .upsert_node(GraphNode { node_id: format!("mem:{memory_id}"), node_type: "memory".to_string(), props: json!({"label": label}) })
                .await?;
            if let Some(nodes) = graph_out.get("nodes").and_then(|v| v.as_array()) {
                for n in nodes {
                    let node_id = n.get("node_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    if node_id.is_empty() {
                        continue;
                    }
                    self.storage
                        .upsert_node(GraphNode {
                            node_id,
                            node_type: n.get("node_type").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
                            props: n.get("props").cloned().unwrap_or(json!({})),
                        })
                        .await?;
                }
            }
            if let Some(edges) = graph_out.get("edges").and_then(|v| v.as_array()) {
                for e in edges {
                    let edge_id = e.get("edge_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    if edge_id.is_empty() {
                        continue;
                    }
                    self.storage
                        .upsert_edge(GraphEdge {
                            edge_id,
                            from: e.get("from").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                            to: e.get("to").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                            edge_type: e.get("edge_type").and_then(|v| v.as_str()).unwrap_or("RELATED").to_string(),
                            weight: e.get("weight").and_then(|v| v.as_f64()).unwrap_or(0.5),
                            valid_from: now,
                            valid_to: None,
                            provenance: json!({"trace_id": trace_id}),
                        })
                        .await?;
                }
            }

            Ok(memory_id)
        }
        .await;

        match &result {
            Ok(_) => self.storage.finish_trace(&trace_id, TraceStatus::Ok, now_ts()).await?,
            Err(_) => self.storage.finish_trace(&trace_id, TraceStatus::Error, now_ts()).await?,
        }
        result.map(|memory_id| (memory_id, trace_id))
    }

    async fn commit_placeholder(&self, payload: &IngestBlobPayload, trace_id: &str, error_kind: &str) -> Result<String, OrchestratorError> {
        let now = now_ts();
        let memory_id = new_id();
        let card = MemoryCard {
            memory_id: memory_id.clone(),
            card_type: "placeholder".to_string(),
            source_time: now,
            created_at: now,
            summary: format!("Unprocessed artifact ({error_kind})"),
            content_text: String::new(),
            metadata: json!({
                "mime": payload.mime,
                "pipeline": "placeholder",
                "blob_id": payload.blob_id,
                "error": error_kind,
            }),
        };
        self.storage.upsert_card(card, Some(payload.blob_id.clone()), Some(trace_id.to_string())).await?;
        self.storage
            .upsert_node(GraphNode { node_id: format!("mem:{memory_id}"), node_type: "memory".to_string(), props: json!({"label": card_label(error_kind)}) })
            .await?;
        Ok(memory_id)
    }
}

fn card_label(error_kind: &str) -> String {
    format!("placeholder ({error_kind})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Blob, Job, JobStatus, Source, SourceType};
    use crate::tools::ToolConfig;

    async fn setup() -> (Storage, Orchestrator) {
        let storage = Storage::open_in_memory().await.unwrap();
        let vector_index = Arc::new(VectorIndex::new());
        let registry = crate::tools::build_default_registry(storage.clone(), ToolConfig::default(), vector_index.clone());
        let locked = ToolRegistryLocked::new(registry);
        let orchestrator = Orchestrator::new(storage.clone(), locked, vector_index, 20);
        (storage, orchestrator)
    }

    async fn seed_text_blob(storage: &Storage, dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"Remember to water the EchoGarden plants.").unwrap();
        let source = storage
            .insert_source(Source { source_id: "s1".into(), source_type: SourceType::Filesystem, uri: "file:///watch".into(), created_ts: 1 })
            .await
            .unwrap();
        let blob = storage
            .insert_blob(Blob {
                blob_id: "b1".into(),
                sha256: "abc".into(),
                path: path.to_string_lossy().to_string(),
                mime: "text/plain".into(),
                size_bytes: 40,
                source_id: source.source_id,
                created_ts: 1,
            })
            .await
            .unwrap();
        blob.blob_id
    }

    #[tokio::test]
    async fn text_ingest_commits_card_and_exec_trace() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, orchestrator) = setup().await;
        let blob_id = seed_text_blob(&storage, &dir).await;

        let job = Job {
            job_id: "j1".into(),
            job_type: "ingest_blob".into(),
            status: JobStatus::Running,
            attempts: 0,
            next_run_ts: 0,
            payload: json!({"blob_id": blob_id, "sha256": "abc", "mime": "text/plain", "size_bytes": 40, "trace_id": "t1"}),
            error_text: None,
            trace_id: Some("t1".into()),
            created_ts: 0,
            updated_ts: 0,
        };

        let memory_id = orchestrator.process_ingest_job(&job).await.unwrap();
        let card = storage.get_card(&memory_id).await.unwrap().unwrap();
        assert_eq!(card.metadata["pipeline"], "doc");

        let trace = storage.get_trace("t1").await.unwrap().unwrap();
        assert_eq!(trace.status, TraceStatus::Ok);

        let (nodes, _edges) = storage.trace_nodes_and_edges("t1").await.unwrap();
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"doc_parse"));
        assert!(names.contains(&"graph_builder"));
        assert!(nodes.iter().all(|n| n.state == ExecNodeState::Ok));
    }

    #[tokio::test]
    async fn duplicate_blob_and_trace_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, orchestrator) = setup().await;
        let blob_id = seed_text_blob(&storage, &dir).await;
        let job = Job {
            job_id: "j1".into(),
            job_type: "ingest_blob".into(),
            status: JobStatus::Running,
            attempts: 0,
            next_run_ts: 0,
            payload: json!({"blob_id": blob_id, "sha256": "abc", "mime": "text/plain", "size_bytes": 40, "trace_id": "t1"}),
            error_text: None,
            trace_id: Some("t1".into()),
            created_ts: 0,
            updated_ts: 0,
        };
        let id1 = orchestrator.process_ingest_job(&job).await.unwrap();
        let id2 = orchestrator.process_ingest_job(&job).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn ingest_text_commits_card_without_a_blob() {
        let (storage, orchestrator) = setup().await;
        let (memory_id, trace_id) = orchestrator
            .ingest_text("Call the dentist tomorrow about the appointment.", "note", json!({"source": "capture"}))
            .await
            .unwrap();
        let card = storage.get_card(&memory_id).await.unwrap().unwrap();
        assert_eq!(card.card_type, "note");
        assert_eq!(card.metadata["pipeline"], "direct");
        let trace = storage.get_trace(&trace_id).await.unwrap().unwrap();
        assert_eq!(trace.status, TraceStatus::Ok);
    }

    #[tokio::test]
    async fn oversize_file_gets_placeholder_card() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, orchestrator) = setup().await;
        let blob_id = seed_text_blob(&storage, &dir).await;
        let job = Job {
            job_id: "j1".into(),
            job_type: "ingest_blob".into(),
            status: JobStatus::Running,
            attempts: 0,
            next_run_ts: 0,
            payload: json!({"blob_id": blob_id, "sha256": "abc", "mime": "text/plain", "size_bytes": 999_000_000i64, "trace_id": "t1"}),
            error_text: None,
            trace_id: Some("t1".into()),
            created_ts: 0,
            updated_ts: 0,
        };
        let memory_id = orchestrator.process_ingest_job(&job).await.unwrap();
        let card = storage.get_card(&memory_id).await.unwrap().unwrap();
        assert_eq!(card.card_type, "placeholder");
    }
}
