//! Q&A-pipeline tools (spec.md §6 tool contracts): `retrieval`, `weaver`,
//! `verifier`. `weaver`/`verifier` MUST have deterministic stub modes (spec.md
//! §9 "LLM absence") so the test suite passes with no network access.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::retriever::{RetrieveFilters, Retriever};

use super::config::ToolConfig;
use super::traits::{Tool, ToolSpec};

pub struct RetrievalTool {
    retriever: Arc<Retriever>,
}

impl RetrievalTool {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[derive(Deserialize)]
struct RetrievalInput {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    8
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        "retrieval"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "retrieval".to_string(),
            description: "Hybrid fusion search over ingested memory cards.".to_string(),
            input_schema: json!({"type": "object", "required": ["query"], "properties": {"query": {"type": "string"}, "top_k": {"type": "integer"}, "filters": {"type": "object"}}}),
            output_schema: json!({"type": "object", "properties": {"results": {"type": "array"}}}),
        }
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: RetrievalInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let hits = self
            .retriever
            .retrieve(&input.query, input.top_k, &RetrieveFilters::default(), None)
            .await
            .map_err(|e| ToolError::DependencyUnavailable(e.to_string()))?;
        let results: Vec<Value> = hits
            .into_iter()
            .map(|h| json!({"memory_id": h.memory_id, "summary": h.summary, "score": h.final_score, "reasons": h.reasons}))
            .collect();
        Ok(json!({"results": results}))
    }
}

pub struct WeaverTool {
    config: Arc<ToolConfig>,
}

impl WeaverTool {
    pub fn new(config: Arc<ToolConfig>) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct Evidence {
    memory_id: String,
    summary: String,
    #[serde(default)]
    #[allow(dead_code)]
    snippet: String,
    #[serde(default)]
    #[allow(dead_code)]
    score: f64,
}

#[derive(Deserialize)]
struct WeaverInput {
    query: String,
    evidence: Vec<Evidence>,
}

/// Without an LLM configured: a bulleted digest of top summaries, each cited
/// with `[memory_id]` (spec.md §4.G's `[file_or_title]` citation token).
fn extractive_weave(evidence: &[Evidence]) -> (String, Vec<String>) {
    if evidence.is_empty() {
        return ("I don't have any ingested information relevant to that question.".to_string(), Vec::new());
    }
    let mut answer = String::new();
    let mut cited = Vec::new();
    for e in evidence.iter().take(5) {
        answer.push_str(&format!("- {} [{}]\n", e.summary, e.memory_id));
        cited.push(e.memory_id.clone());
    }
    (answer.trim_end().to_string(), cited)
}

#[async_trait]
impl Tool for WeaverTool {
    fn name(&self) -> &str {
        "weaver"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "weaver".to_string(),
            description: "Composes a cited answer from retrieved evidence.".to_string(),
            input_schema: json!({"type": "object", "required": ["query", "evidence"], "properties": {"query": {"type": "string"}, "evidence": {"type": "array"}}}),
            output_schema: json!({"type": "object", "properties": {"answer": {"type": "string"}, "cited_memory_ids": {"type": "array"}}}),
        }
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: WeaverInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        if self.config.llm_configured() {
            let url = format!("{}/weave", self.config.llm_url.as_deref().unwrap_or_default());
            let body = json!({"query": input.query, "evidence": input.evidence.iter().map(|e| json!({"memory_id": e.memory_id, "summary": e.summary})).collect::<Vec<_>>()});
            if let Ok(resp) = self.config.http.post(&url).json(&body).send().await {
                if resp.status().is_success() {
                    if let Ok(out) = resp.json::<Value>().await {
                        return Ok(out);
                    }
                }
            }
        }
        let (answer, cited) = extractive_weave(&input.evidence);
        Ok(json!({"answer": answer, "cited_memory_ids": cited}))
    }
}

pub struct VerifierTool {
    #[allow(dead_code)]
    config: Arc<ToolConfig>,
}

impl VerifierTool {
    pub fn new(config: Arc<ToolConfig>) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct VerifierInput {
    #[allow(dead_code)]
    query: String,
    answer: String,
    evidence: Vec<Evidence>,
}

#[async_trait]
impl Tool for VerifierTool {
    fn name(&self) -> &str {
        "verifier"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "verifier".to_string(),
            description: "Judges an answer against its cited evidence.".to_string(),
            input_schema: json!({"type": "object", "required": ["query", "answer", "evidence"], "properties": {"query": {"type": "string"}, "answer": {"type": "string"}, "evidence": {"type": "array"}}}),
            output_schema: json!({"type": "object", "properties": {"verdict": {"type": "string"}, "revised_answer": {"type": "string"}, "flagged_claims": {"type": "array"}}}),
        }
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: VerifierInput =
            serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;

        // Deterministic rule: no evidence means no grounding, regardless of
        // whether an LLM is configured — abstain rather than hallucinate.
        if input.evidence.is_empty() {
            return Ok(json!({
                "verdict": "abstain",
                "revised_answer": "I don't have enough ingested information to answer that.",
            }));
        }
        let cites_something = input.evidence.iter().any(|e| input.answer.contains(&format!("[{}]", e.memory_id)));
        if cites_something {
            Ok(json!({"verdict": "pass"}))
        } else {
            Ok(json!({
                "verdict": "revise",
                "revised_answer": format!("{}\n[{}]", input.answer, input.evidence[0].memory_id),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifier_abstains_with_no_evidence() {
        let verifier = VerifierTool::new(Arc::new(ToolConfig::default()));
        let out = verifier
            .call(json!({"query": "q", "answer": "a", "evidence": []}))
            .await
            .unwrap();
        assert_eq!(out["verdict"], "abstain");
    }

    #[tokio::test]
    async fn weaver_fallback_cites_every_summary() {
        let weaver = WeaverTool::new(Arc::new(ToolConfig::default()));
        let out = weaver
            .call(json!({"query": "q", "evidence": [{"memory_id": "m1", "summary": "s1", "snippet": "", "score": 1.0}]}))
            .await
            .unwrap();
        assert!(out["answer"].as_str().unwrap().contains("[m1]"));
        assert_eq!(out["cited_memory_ids"], json!(["m1"]));
    }
}
