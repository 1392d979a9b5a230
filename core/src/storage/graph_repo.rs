//! Graph node/edge repository (spec.md §4.A, §4.E). Persistence only — BFS
//! expansion and text search ranking live in [`crate::graph`], which calls
//! through `neighbors`/`search` here one hop at a time.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{GraphEdge, GraphNode};

use super::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborDirection {
    Out,
    In,
    Both,
}

#[derive(Debug, Clone, Default)]
pub struct NeighborsFilter {
    pub edge_types: Option<Vec<String>>,
    pub direction: Option<NeighborDirection>,
    pub since_ts: Option<i64>,
}

impl Storage {
    pub async fn upsert_node(&self, node: GraphNode) -> Result<GraphNode, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO graph_node (node_id, node_type, props) VALUES (?1, ?2, ?3)
                 ON CONFLICT(node_id) DO UPDATE SET
                    node_type = excluded.node_type,
                    props = excluded.props",
                params![node.node_id, node.node_type, serde_json::to_string(&node.props)?],
            )?;
            Ok(node)
        })
        .await
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>, StorageError> {
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT node_id, node_type, props FROM graph_node WHERE node_id = ?1",
                    params![node_id],
                    row_to_node,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Repeated upsert of the same `edge_id` accumulates weight, capped at 1,
    /// to reflect accumulating evidence for the same relationship (spec.md §4.E).
    pub async fn upsert_edge(&self, edge: GraphEdge) -> Result<GraphEdge, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO graph_edge
                    (edge_id, from_node, to_node, edge_type, weight, valid_from, valid_to, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(edge_id) DO UPDATE SET
                    weight = MIN(1.0, graph_edge.weight + excluded.weight),
                    valid_to = excluded.valid_to",
                params![
                    edge.edge_id,
                    edge.from,
                    edge.to,
                    edge.edge_type,
                    edge.weight,
                    edge.valid_from,
                    edge.valid_to,
                    serde_json::to_string(&edge.provenance)?
                ],
            )?;
            let stored_weight: f64 = conn.query_row(
                "SELECT weight FROM graph_edge WHERE edge_id = ?1",
                params![edge.edge_id],
                |r| r.get(0),
            )?;
            Ok(GraphEdge { weight: stored_weight, ..edge })
        })
        .await
    }

    pub async fn get_edge(&self, edge_id: &str) -> Result<Option<GraphEdge>, StorageError> {
        let edge_id = edge_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT edge_id, from_node, to_node, edge_type, weight, valid_from, valid_to, provenance
                     FROM graph_edge WHERE edge_id = ?1",
                    params![edge_id],
                    |r| {
                        let provenance: String = r.get(7)?;
                        Ok(GraphEdge {
                            edge_id: r.get(0)?,
                            from: r.get(1)?,
                            to: r.get(2)?,
                            edge_type: r.get(3)?,
                            weight: r.get(4)?,
                            valid_from: r.get(5)?,
                            valid_to: r.get(6)?,
                            provenance: serde_json::from_str(&provenance).unwrap_or(Value::Null),
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// One-hop neighbor lookup, filtered by edge type / direction / recency.
    /// Results are ordered by `weight DESC, edge_id ASC` for a deterministic tie-break.
    pub async fn neighbors(
        &self,
        node_id: &str,
        filter: NeighborsFilter,
    ) -> Result<Vec<(GraphEdge, GraphNode)>, StorageError> {
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let direction = filter.direction.unwrap_or(NeighborDirection::Both);
            let mut out = Vec::new();

            if matches!(direction, NeighborDirection::Out | NeighborDirection::Both) {
                out.extend(query_direction(
                    conn,
                    &node_id,
                    true,
                    filter.edge_types.as_deref(),
                    filter.since_ts,
                )?);
            }
            if matches!(direction, NeighborDirection::In | NeighborDirection::Both) {
                out.extend(query_direction(
                    conn,
                    &node_id,
                    false,
                    filter.edge_types.as_deref(),
                    filter.since_ts,
                )?);
            }
            out.sort_by(|a, b| {
                b.0.weight
                    .partial_cmp(&a.0.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.edge_id.cmp(&b.0.edge_id))
            });
            Ok(out)
        })
        .await
    }

    /// Substring search over node labels (the `name`/`label` key in `props`, if present).
    pub async fn search_nodes(&self, query: &str, limit: i64) -> Result<Vec<GraphNode>, StorageError> {
        let pattern = format!("%{}%", query.replace('%', "").replace('_', ""));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, node_type, props FROM graph_node
                 WHERE props LIKE ?1 ESCAPE '\\' ORDER BY node_id LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit], row_to_node)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn query_direction(
    conn: &rusqlite::Connection,
    node_id: &str,
    outgoing: bool,
    edge_types: Option<&[String]>,
    since_ts: Option<i64>,
) -> Result<Vec<(GraphEdge, GraphNode)>, StorageError> {
    let anchor_col = if outgoing { "from_node" } else { "to_node" };
    let other_col = if outgoing { "to_node" } else { "from_node" };
    let mut sql = format!(
        "SELECT e.edge_id, e.from_node, e.to_node, e.edge_type, e.weight,
                e.valid_from, e.valid_to, e.provenance,
                n.node_id, n.node_type, n.props
         FROM graph_edge e
         JOIN graph_node n ON n.node_id = e.{other_col}
         WHERE e.{anchor_col} = ?1"
    );
    let mut idx = 2;
    let edge_types = edge_types.filter(|types| !types.is_empty());
    if let Some(types) = edge_types {
        let placeholders: Vec<String> = (0..types.len()).map(|i| format!("?{}", idx + i)).collect();
        sql.push_str(&format!(" AND e.edge_type IN ({})", placeholders.join(", ")));
        idx += types.len();
    }
    let since_placeholder = if since_ts.is_some() {
        sql.push_str(&format!(" AND e.valid_from >= ?{idx}"));
        true
    } else {
        false
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&node_id];
    if let Some(types) = edge_types {
        for t in types {
            bound.push(t);
        }
    }
    if since_placeholder {
        bound.push(since_ts.as_ref().unwrap());
    }
    let mut rows_out = Vec::new();
    let rows = stmt.query_map(bound.as_slice(), row_to_edge_node)?;
    for row in rows {
        rows_out.push(row?);
    }
    Ok(rows_out)
}

fn row_to_node(r: &rusqlite::Row) -> rusqlite::Result<GraphNode> {
    let props: String = r.get(2)?;
    Ok(GraphNode {
        node_id: r.get(0)?,
        node_type: r.get(1)?,
        props: serde_json::from_str(&props).unwrap_or(Value::Null),
    })
}

fn row_to_edge_node(r: &rusqlite::Row) -> rusqlite::Result<(GraphEdge, GraphNode)> {
    let provenance: String = r.get(7)?;
    let props: String = r.get(10)?;
    let edge = GraphEdge {
        edge_id: r.get(0)?,
        from: r.get(1)?,
        to: r.get(2)?,
        edge_type: r.get(3)?,
        weight: r.get(4)?,
        valid_from: r.get(5)?,
        valid_to: r.get(6)?,
        provenance: serde_json::from_str(&provenance).unwrap_or(Value::Null),
    };
    let node = GraphNode {
        node_id: r.get(8)?,
        node_type: r.get(9)?,
        props: serde_json::from_str(&props).unwrap_or(Value::Null),
    };
    Ok((edge, node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed(storage: &Storage) {
        storage
            .upsert_node(GraphNode { node_id: "a".into(), node_type: "person".into(), props: json!({"label": "Ada"}) })
            .await
            .unwrap();
        storage
            .upsert_node(GraphNode { node_id: "b".into(), node_type: "person".into(), props: json!({"label": "Bob"}) })
            .await
            .unwrap();
        storage
            .upsert_edge(GraphEdge {
                edge_id: "e1".into(),
                from: "a".into(),
                to: "b".into(),
                edge_type: "knows".into(),
                weight: 1.0,
                valid_from: 1,
                valid_to: None,
                provenance: json!({}),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn neighbors_both_directions_finds_edge_from_either_end() {
        let storage = Storage::open_in_memory().await.unwrap();
        seed(&storage).await;
        let from_a = storage.neighbors("a", NeighborsFilter::default()).await.unwrap();
        let from_b = storage.neighbors("b", NeighborsFilter::default()).await.unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_a[0].1.node_id, "b");
        assert_eq!(from_b[0].1.node_id, "a");
    }

    #[tokio::test]
    async fn upsert_edge_accumulates_weight_capped_at_one() {
        let storage = Storage::open_in_memory().await.unwrap();
        seed(&storage).await;
        storage
            .upsert_edge(GraphEdge {
                edge_id: "e1".into(),
                from: "a".into(),
                to: "b".into(),
                edge_type: "knows".into(),
                weight: 0.7,
                valid_from: 2,
                valid_to: None,
                provenance: json!({}),
            })
            .await
            .unwrap();
        let edge = storage.get_edge("e1").await.unwrap().unwrap();
        assert_eq!(edge.weight, 1.0);
    }

    #[tokio::test]
    async fn neighbors_out_only_excludes_incoming() {
        let storage = Storage::open_in_memory().await.unwrap();
        seed(&storage).await;
        let out_of_b = storage
            .neighbors(
                "b",
                NeighborsFilter { direction: Some(NeighborDirection::Out), ..Default::default() },
            )
            .await
            .unwrap();
        assert!(out_of_b.is_empty());
    }
}
