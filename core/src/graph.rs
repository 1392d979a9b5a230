//! Graph service (spec.md §4.E): BFS expansion and label search over the
//! node/edge repository in [`crate::storage::graph_repo`]. No teacher
//! equivalent — the origin crate's `graph` module is an unrelated in-process
//! `StateGraph` for LLM-agent steps, not a persisted knowledge graph.

use std::collections::{HashSet, VecDeque};

use crate::error::StorageError;
use crate::model::{GraphEdge, GraphNode};
use crate::storage::{NeighborDirection, NeighborsFilter, Storage};

#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub hops: u8,
    pub direction: NeighborDirection,
    pub edge_types: Option<Vec<String>>,
    pub time_min: Option<i64>,
    pub time_max: Option<i64>,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            hops: 1,
            direction: NeighborDirection::Both,
            edge_types: None,
            time_min: None,
            time_max: None,
            max_nodes: 100,
            max_edges: 200,
        }
    }
}

pub struct GraphService {
    storage: Storage,
}

impl GraphService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> Result<usize, StorageError> {
        let count = nodes.len();
        for node in nodes {
            self.storage.upsert_node(node).await?;
        }
        Ok(count)
    }

    pub async fn upsert_edges(&self, edges: Vec<GraphEdge>) -> Result<usize, StorageError> {
        let count = edges.len();
        for edge in edges {
            self.storage.upsert_edge(edge).await?;
        }
        Ok(count)
    }

    /// BFS from `seeds`, pruning by edge type and `valid_from/valid_to`
    /// intersecting `[time_min, time_max]`. At each hop boundary, edges are
    /// considered in `(weight DESC, valid_from DESC)` order (the repository
    /// already orders by weight; we re-sort by `valid_from` within ties here)
    /// so the walk visits higher-confidence, fresher relationships first.
    /// Stops as soon as either limit is hit.
    pub async fn expand(&self, seeds: Vec<String>, opts: ExpandOptions) -> Result<Subgraph, StorageError> {
        let mut visited_nodes: HashSet<String> = HashSet::new();
        let mut visited_edges: HashSet<String> = HashSet::new();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for seed in &seeds {
            if let Some(node) = self.storage.get_node(seed).await? {
                if visited_nodes.insert(node.node_id.clone()) {
                    nodes.push(node);
                }
            }
        }

        let mut frontier: VecDeque<(String, u8)> = seeds.into_iter().map(|s| (s, 0)).collect();

        while let Some((node_id, depth)) = frontier.pop_front() {
            if depth >= opts.hops {
                continue;
            }
            if nodes.len() >= opts.max_nodes || edges.len() >= opts.max_edges {
                break;
            }
            let mut hop_results = self
                .storage
                .neighbors(
                    &node_id,
                    NeighborsFilter { edge_types: opts.edge_types.clone(), direction: Some(opts.direction), since_ts: opts.time_min },
                )
                .await?;
            hop_results.sort_by(|a, b| {
                b.0.weight
                    .partial_cmp(&a.0.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.valid_from.cmp(&a.0.valid_from))
            });

            for (edge, neighbor) in hop_results {
                if let Some(max) = opts.time_max {
                    if edge.valid_from > max {
                        continue;
                    }
                }
                if edges.len() >= opts.max_edges || nodes.len() >= opts.max_nodes {
                    break;
                }
                if visited_edges.insert(edge.edge_id.clone()) {
                    edges.push(edge);
                }
                if visited_nodes.insert(neighbor.node_id.clone()) {
                    nodes.push(neighbor.clone());
                    frontier.push_back((neighbor.node_id, depth + 1));
                }
            }
        }

        Ok(Subgraph { nodes, edges })
    }

    /// Label search: prefix match on `props.label` ranks first, substring
    /// match second, both filtered by `node_type` when given.
    pub async fn search(&self, query: &str, node_type: Option<&str>, limit: i64) -> Result<Vec<GraphNode>, StorageError> {
        let mut matches = self.storage.search_nodes(query, limit * 4).await?;
        if let Some(nt) = node_type {
            matches.retain(|n| n.node_type == nt);
        }
        let query_lower = query.to_lowercase();
        matches.sort_by_key(|n| {
            let label = n.props.get("label").and_then(|v| v.as_str()).unwrap_or_default().to_lowercase();
            if label.starts_with(&query_lower) {
                0
            } else {
                1
            }
        });
        matches.truncate(limit as usize);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn expand_two_hops_is_superset_of_one_hop() {
        let storage = Storage::open_in_memory().await.unwrap();
        let service = GraphService::new(storage);
        service
            .upsert_nodes(vec![
                GraphNode { node_id: "a".into(), node_type: "entity".into(), props: json!({"label": "Ada"}) },
                GraphNode { node_id: "b".into(), node_type: "entity".into(), props: json!({"label": "Bob"}) },
                GraphNode { node_id: "c".into(), node_type: "entity".into(), props: json!({"label": "Cleo"}) },
            ])
            .await
            .unwrap();
        service
            .upsert_edges(vec![
                GraphEdge { edge_id: "ab".into(), from: "a".into(), to: "b".into(), edge_type: "knows".into(), weight: 0.9, valid_from: 1, valid_to: None, provenance: json!({}) },
                GraphEdge { edge_id: "bc".into(), from: "b".into(), to: "c".into(), edge_type: "knows".into(), weight: 0.9, valid_from: 2, valid_to: None, provenance: json!({}) },
            ])
            .await
            .unwrap();

        let one_hop = service.expand(vec!["a".into()], ExpandOptions { hops: 1, max_nodes: 100, max_edges: 100, ..Default::default() }).await.unwrap();
        let two_hop = service.expand(vec!["a".into()], ExpandOptions { hops: 2, max_nodes: 100, max_edges: 100, ..Default::default() }).await.unwrap();

        let one_ids: HashSet<_> = one_hop.nodes.iter().map(|n| n.node_id.clone()).collect();
        let two_ids: HashSet<_> = two_hop.nodes.iter().map(|n| n.node_id.clone()).collect();
        assert!(one_ids.is_subset(&two_ids));
        assert!(two_ids.contains("c"));
    }

    #[tokio::test]
    async fn expand_respects_max_nodes() {
        let storage = Storage::open_in_memory().await.unwrap();
        let service = GraphService::new(storage);
        let mut nodes = vec![GraphNode { node_id: "root".into(), node_type: "entity".into(), props: json!({}) }];
        let mut edges = Vec::new();
        for i in 0..10 {
            let id = format!("n{i}");
            nodes.push(GraphNode { node_id: id.clone(), node_type: "entity".into(), props: json!({}) });
            edges.push(GraphEdge { edge_id: format!("e{i}"), from: "root".into(), to: id, edge_type: "rel".into(), weight: 0.5, valid_from: i, valid_to: None, provenance: json!({}) });
        }
        service.upsert_nodes(nodes).await.unwrap();
        service.upsert_edges(edges).await.unwrap();

        let result = service.expand(vec!["root".into()], ExpandOptions { hops: 1, max_nodes: 3, max_edges: 100, ..Default::default() }).await.unwrap();
        assert!(result.nodes.len() <= 3);
    }
}
