//! `/graph/*` routes (spec.md §4.E, §6): node/edge upsert, one-hop queries,
//! multi-hop BFS expansion, and label search.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use echogarden_core::graph::ExpandOptions;
use echogarden_core::model::{GraphEdge, GraphNode};
use echogarden_core::storage::{NeighborDirection, NeighborsFilter};

use crate::app::AppState;
use crate::error::ApiResult;

fn parse_direction(s: Option<&str>) -> NeighborDirection {
    match s {
        Some("out") => NeighborDirection::Out,
        Some("in") => NeighborDirection::In,
        _ => NeighborDirection::Both,
    }
}

#[derive(Deserialize)]
pub struct UpsertRequest {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<GraphEdge>,
}

pub async fn upsert(State(state): State<Arc<AppState>>, Json(req): Json<UpsertRequest>) -> ApiResult<Json<serde_json::Value>> {
    let node_count = state.graph.upsert_nodes(req.nodes).await?;
    let edge_count = state.graph.upsert_edges(req.edges).await?;
    Ok(Json(json!({"nodes_upserted": node_count, "edges_upserted": edge_count})))
}

#[derive(Deserialize)]
pub struct QueryNeighborsRequest {
    node_id: String,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    edge_type: Option<String>,
    #[serde(default)]
    since_ts: Option<i64>,
}

pub async fn query_neighbors(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryNeighborsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = NeighborsFilter {
        edge_types: req.edge_type.map(|t| vec![t]),
        direction: Some(parse_direction(req.direction.as_deref())),
        since_ts: req.since_ts,
    };
    let neighbors = state.storage.neighbors(&req.node_id, filter).await?;
    let results: Vec<_> = neighbors.into_iter().map(|(edge, node)| json!({"edge": edge, "node": node})).collect();
    Ok(Json(json!({"neighbors": results})))
}

#[derive(Deserialize)]
pub struct ExpandRequest {
    seed_node_ids: Vec<String>,
    #[serde(default)]
    hops: Option<u8>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    edge_types: Option<Vec<String>>,
    #[serde(default)]
    time_min: Option<i64>,
    #[serde(default)]
    time_max: Option<i64>,
    #[serde(default)]
    max_nodes: Option<usize>,
    #[serde(default)]
    max_edges: Option<usize>,
}

pub async fn expand(State(state): State<Arc<AppState>>, Json(req): Json<ExpandRequest>) -> ApiResult<Json<serde_json::Value>> {
    let defaults = ExpandOptions::default();
    let opts = ExpandOptions {
        hops: req.hops.unwrap_or(defaults.hops),
        direction: parse_direction(req.direction.as_deref()),
        edge_types: req.edge_types,
        time_min: req.time_min,
        time_max: req.time_max,
        max_nodes: req.max_nodes.unwrap_or(defaults.max_nodes),
        max_edges: req.max_edges.unwrap_or(defaults.max_edges),
    };
    let subgraph = state.graph.expand(req.seed_node_ids, opts).await?;
    Ok(Json(json!({"nodes": subgraph.nodes, "edges": subgraph.edges})))
}

#[derive(Deserialize)]
pub struct SubgraphQuery {
    seed: String,
    #[serde(default)]
    hops: Option<u8>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn subgraph(State(state): State<Arc<AppState>>, Query(q): Query<SubgraphQuery>) -> ApiResult<Json<serde_json::Value>> {
    let defaults = ExpandOptions::default();
    let opts = ExpandOptions {
        hops: q.hops.unwrap_or(defaults.hops),
        max_nodes: q.limit.unwrap_or(defaults.max_nodes),
        ..defaults
    };
    let seeds: Vec<String> = q.seed.split(',').map(str::to_string).collect();
    let subgraph = state.graph.expand(seeds, opts).await?;
    Ok(Json(json!({"nodes": subgraph.nodes, "edges": subgraph.edges})))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    query: String,
    #[serde(rename = "type")]
    #[serde(default)]
    node_type: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn search(State(state): State<Arc<AppState>>, Query(q): Query<SearchQuery>) -> ApiResult<Json<serde_json::Value>> {
    let nodes = state.graph.search(&q.query, q.node_type.as_deref(), q.limit.unwrap_or(20)).await?;
    Ok(Json(json!({"nodes": nodes})))
}

#[derive(Deserialize)]
pub struct NeighborsQuery {
    node_id: String,
    #[serde(default)]
    hops: Option<u8>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn neighbors(State(state): State<Arc<AppState>>, Query(q): Query<NeighborsQuery>) -> ApiResult<Json<serde_json::Value>> {
    let defaults = ExpandOptions::default();
    let opts = ExpandOptions { hops: q.hops.unwrap_or(1), max_nodes: q.limit.unwrap_or(defaults.max_nodes), ..defaults };
    let subgraph = state.graph.expand(vec![q.node_id], opts).await?;
    Ok(Json(json!({"nodes": subgraph.nodes, "edges": subgraph.edges})))
}
