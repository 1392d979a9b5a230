//! Hybrid Retriever (spec.md §4.F): fuses full-text, semantic, graph, and
//! recency signals into one ranked list. Grounded on
//! `memory/in_memory_vector_store.rs`'s cosine-similarity shape for the
//! semantic signal; FTS/graph/recency are new, built directly against
//! [`crate::storage`] and [`crate::storage::graph_repo`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::error::RetrieverError;
use crate::graph::{ExpandOptions, GraphService};
use crate::model::{now_ts, MemoryCard};
use crate::storage::{NeighborDirection, Storage};
use crate::tools::ToolRegistryLocked;
use crate::vector_index::VectorIndex;

const DEFAULT_GRAPH_HOPS: u8 = 1;

const RECENCY_TAU_DAYS: f64 = 14.0;
const CANDIDATE_POOL: i64 = 50;

#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub semantic: f64,
    pub fts: f64,
    pub graph: f64,
    pub recency: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { semantic: 0.40, fts: 0.20, graph: 0.20, recency: 0.20 }
    }
}

#[derive(Debug, Clone)]
pub struct RetrieveFilters {
    pub source_type: Option<String>,
    pub card_type: Option<String>,
    pub time_min: Option<i64>,
    pub time_max: Option<i64>,
    /// Whether the graph signal contributes to fusion (spec.md §4.F `use_graph`).
    pub use_graph: bool,
    /// Hop count the graph signal's entity-to-memory traversal is allowed to
    /// walk before it stops pulling in more `mem:` nodes (spec.md §4.F `hops`).
    pub hops: Option<u8>,
}

impl Default for RetrieveFilters {
    fn default() -> Self {
        Self { source_type: None, card_type: None, time_min: None, time_max: None, use_graph: true, hops: None }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub memory_id: String,
    pub summary: String,
    pub final_score: f64,
    pub reasons: Vec<String>,
}

pub struct Retriever {
    storage: Storage,
    vector_index: Arc<VectorIndex>,
    registry: ToolRegistryLocked,
    weights: FusionWeights,
}

impl Retriever {
    pub fn new(
        storage: Storage,
        vector_index: Arc<VectorIndex>,
        registry: ToolRegistryLocked,
        weights: FusionWeights,
    ) -> Self {
        Self { storage, vector_index, registry, weights }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: &RetrieveFilters,
        trace_id: Option<&str>,
    ) -> Result<Vec<RetrievalHit>, RetrieverError> {
        let mut cards: HashMap<String, MemoryCard> = HashMap::new();
        let mut raw: HashMap<&'static str, HashMap<String, f64>> = HashMap::new();

        raw.insert("fts", self.fts_signal(query, &mut cards).await?);
        raw.insert("semantic", self.semantic_signal(query, trace_id, &mut cards).await?);
        raw.insert(
            "graph",
            if filters.use_graph {
                self.graph_signal(query, filters.hops.unwrap_or(DEFAULT_GRAPH_HOPS), &mut cards).await?
            } else {
                HashMap::new()
            },
        );
        raw.insert("recency", self.recency_signal(&mut cards).await?);

        let normalized: HashMap<&'static str, HashMap<String, f64>> =
            raw.into_iter().map(|(name, scores)| (name, min_max_normalize(scores))).collect();

        let mut hits: Vec<RetrievalHit> = cards
            .values()
            .filter(|c| passes_filters(c, filters))
            .map(|card| {
                let mut final_score = 0.0;
                let mut reasons = Vec::new();
                for (signal, weight) in [
                    ("fts", self.weights.fts),
                    ("semantic", self.weights.semantic),
                    ("graph", self.weights.graph),
                    ("recency", self.weights.recency),
                ] {
                    let score = normalized.get(signal).and_then(|m| m.get(&card.memory_id)).copied().unwrap_or(0.0);
                    if score > 0.0 {
                        final_score += weight * score;
                        reasons.push(signal.to_string());
                    }
                }
                let boost = source_boost(card);
                if boost > 0.0 {
                    final_score += boost;
                    reasons.push("source_boost".to_string());
                }
                RetrievalHit { memory_id: card.memory_id.clone(), summary: card.summary.clone(), final_score, reasons }
            })
            .filter(|h| !h.reasons.is_empty())
            .collect();

        hits.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn fts_signal(
        &self,
        query: &str,
        cards: &mut HashMap<String, MemoryCard>,
    ) -> Result<HashMap<String, f64>, RetrieverError> {
        let hits = self.storage.search_cards(query, CANDIDATE_POOL).await?;
        let mut scores = HashMap::new();
        for (card, rank) in hits {
            // bm25 rank: lower (more negative) is a better match.
            scores.insert(card.memory_id.clone(), -rank);
            cards.insert(card.memory_id.clone(), card);
        }
        Ok(scores)
    }

    async fn semantic_signal(
        &self,
        query: &str,
        trace_id: Option<&str>,
        cards: &mut HashMap<String, MemoryCard>,
    ) -> Result<HashMap<String, f64>, RetrieverError> {
        let embed_out = self
            .registry
            .dispatch("text_embed", json!({"text": query}), trace_id)
            .await?;
        let vector_ref = embed_out.get("vector_ref").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let Some(query_vector) = self.vector_index.get(&vector_ref) else {
            return Ok(HashMap::new());
        };
        self.vector_index.remove(&vector_ref);

        let hits = self.vector_index.search(&query_vector, CANDIDATE_POOL as usize);
        let mut scores = HashMap::new();
        for hit in hits {
            if hit.memory_id.starts_with("vec:") {
                continue;
            }
            if let Some(card) = self.storage.get_card(&hit.memory_id).await? {
                scores.insert(hit.memory_id.clone(), hit.score as f64);
                cards.insert(hit.memory_id, card);
            }
        }
        Ok(scores)
    }

    /// Walks out from the entities matched by `query` along `MENTIONS` edges,
    /// up to `hops` deep, and scores every `mem:` node reached by the mean
    /// weight of the edges that led to it.
    async fn graph_signal(
        &self,
        query: &str,
        hops: u8,
        cards: &mut HashMap<String, MemoryCard>,
    ) -> Result<HashMap<String, f64>, RetrieverError> {
        let entities = self.storage.search_nodes(query, 10).await?;
        if entities.is_empty() {
            return Ok(HashMap::new());
        }
        let seeds: Vec<String> = entities.into_iter().map(|e| e.node_id).collect();

        let graph = GraphService::new(self.storage.clone());
        let subgraph = graph
            .expand(
                seeds,
                ExpandOptions {
                    hops: hops.max(1),
                    direction: NeighborDirection::Both,
                    edge_types: Some(vec!["MENTIONS".to_string()]),
                    max_nodes: 200,
                    max_edges: 400,
                    ..ExpandOptions::default()
                },
            )
            .await?;

        let mut weight_sums: HashMap<String, (f64, usize)> = HashMap::new();
        for edge in &subgraph.edges {
            for node_id in [&edge.from, &edge.to] {
                if let Some(memory_id) = node_id.strip_prefix("mem:") {
                    let entry = weight_sums.entry(memory_id.to_string()).or_insert((0.0, 0));
                    entry.0 += edge.weight;
                    entry.1 += 1;
                }
            }
        }
        let mut scores = HashMap::new();
        for (memory_id, (sum, count)) in weight_sums {
            if count == 0 {
                continue;
            }
            if let Some(card) = self.storage.get_card(&memory_id).await? {
                scores.insert(memory_id.clone(), sum / count as f64);
                cards.insert(memory_id, card);
            }
        }
        Ok(scores)
    }

    async fn recency_signal(
        &self,
        cards: &mut HashMap<String, MemoryCard>,
    ) -> Result<HashMap<String, f64>, RetrieverError> {
        let recent = self.storage.recent_cards(CANDIDATE_POOL).await?;
        let now = now_ts();
        let mut scores = HashMap::new();
        for card in recent {
            let age_days = ((now - card.created_at).max(0) as f64) / 86_400_000.0;
            scores.insert(card.memory_id.clone(), (-age_days / RECENCY_TAU_DAYS).exp());
            cards.insert(card.memory_id.clone(), card);
        }
        Ok(scores)
    }
}

fn min_max_normalize(scores: HashMap<String, f64>) -> HashMap<String, f64> {
    if scores.is_empty() {
        return scores;
    }
    let min = scores.values().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return scores.into_iter().map(|(k, v)| (k, if v > 0.0 { 1.0 } else { 0.0 })).collect();
    }
    scores.into_iter().map(|(k, v)| (k, (v - min) / (max - min))).collect()
}

fn source_boost(card: &MemoryCard) -> f64 {
    let pipeline = card.metadata.get("pipeline").and_then(|v| v.as_str()).unwrap_or_default();
    match (card.card_type.as_str(), pipeline) {
        ("browser_highlight", _) => 0.05,
        (_, "doc") => 0.03,
        _ => 0.0,
    }
}

fn passes_filters(card: &MemoryCard, filters: &RetrieveFilters) -> bool {
    if let Some(ct) = &filters.card_type {
        if &card.card_type != ct {
            return false;
        }
    }
    if let Some(st) = &filters.source_type {
        if card.metadata.get("source_type").and_then(|v| v.as_str()) != Some(st.as_str()) {
            return false;
        }
    }
    if let Some(min) = filters.time_min {
        if card.source_time < min {
            return false;
        }
    }
    if let Some(max) = filters.time_max {
        if card.source_time > max {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryCard;
    use serde_json::json;

    fn card(id: &str, created_at: i64) -> MemoryCard {
        MemoryCard {
            memory_id: id.to_string(),
            card_type: "note".to_string(),
            source_time: created_at,
            created_at,
            summary: "EchoGarden knowledge garden".to_string(),
            content_text: "EchoGarden is a local-first knowledge garden.".to_string(),
            metadata: json!({"pipeline": "text"}),
        }
    }

    #[tokio::test]
    async fn retrieve_surfaces_fts_and_semantic_reasons() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.upsert_card(card("m1", now_ts()), None, None).await.unwrap();

        let vector_index = Arc::new(VectorIndex::new());
        let config = crate::tools::ToolConfig::default();
        let registry = crate::tools::build_default_registry(storage.clone(), config, vector_index.clone());
        // Directly seed the card's vector so the semantic signal has something to match.
        let card_vec = crate::tools::deterministic_embedding("EchoGarden knowledge garden", 256);
        vector_index.upsert("m1".to_string(), card_vec);
        let locked = crate::tools::ToolRegistryLocked::new(registry);

        let retriever = Retriever::new(storage, vector_index, locked, FusionWeights::default());
        let hits = retriever.retrieve("knowledge garden", 5, &RetrieveFilters::default(), None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].reasons.contains(&"fts".to_string()));
    }
}
