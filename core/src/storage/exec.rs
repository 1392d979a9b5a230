//! Execution trace repository (spec.md §4.D). `ExecTrace`/`ExecNode`/`ExecEdge`
//! rows are append-only: the orchestrator inserts a node in `pending` state and
//! later updates it in place as it transitions, but never deletes a row.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{
    EdgeCondition, ExecEdge, ExecNode, ExecNodeState, ExecTrace, ToolCall, ToolCallStatus,
    TraceStatus,
};

use super::Storage;

fn trace_status_str(s: TraceStatus) -> &'static str {
    match s {
        TraceStatus::Running => "running",
        TraceStatus::Ok => "ok",
        TraceStatus::Error => "error",
        TraceStatus::Cancelled => "cancelled",
    }
}

fn trace_status_from_str(s: &str) -> TraceStatus {
    match s {
        "ok" => TraceStatus::Ok,
        "error" => TraceStatus::Error,
        "cancelled" => TraceStatus::Cancelled,
        _ => TraceStatus::Running,
    }
}

fn node_state_str(s: ExecNodeState) -> &'static str {
    match s {
        ExecNodeState::Pending => "pending",
        ExecNodeState::Running => "running",
        ExecNodeState::Ok => "ok",
        ExecNodeState::Error => "error",
        ExecNodeState::Timeout => "timeout",
    }
}

fn node_state_from_str(s: &str) -> ExecNodeState {
    match s {
        "running" => ExecNodeState::Running,
        "ok" => ExecNodeState::Ok,
        "error" => ExecNodeState::Error,
        "timeout" => ExecNodeState::Timeout,
        _ => ExecNodeState::Pending,
    }
}

fn edge_condition_str(c: EdgeCondition) -> &'static str {
    match c {
        EdgeCondition::Always => "always",
        EdgeCondition::OnOk => "on_ok",
        EdgeCondition::OnError => "on_error",
    }
}

fn edge_condition_from_str(s: &str) -> EdgeCondition {
    match s {
        "on_ok" => EdgeCondition::OnOk,
        "on_error" => EdgeCondition::OnError,
        _ => EdgeCondition::Always,
    }
}

fn call_status_str(s: ToolCallStatus) -> &'static str {
    match s {
        ToolCallStatus::Ok => "ok",
        ToolCallStatus::Error => "error",
    }
}

impl Storage {
    pub async fn insert_trace(&self, trace: ExecTrace) -> Result<ExecTrace, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO exec_trace (trace_id, started_ts, finished_ts, status, root_call_id, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    trace.trace_id,
                    trace.started_ts,
                    trace.finished_ts,
                    trace_status_str(trace.status),
                    trace.root_call_id,
                    serde_json::to_string(&trace.metadata)?
                ],
            )?;
            Ok(trace)
        })
        .await
    }

    pub async fn finish_trace(
        &self,
        trace_id: &str,
        status: TraceStatus,
        finished_ts: i64,
    ) -> Result<(), StorageError> {
        let trace_id = trace_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE exec_trace SET status = ?1, finished_ts = ?2 WHERE trace_id = ?3",
                params![trace_status_str(status), finished_ts, trace_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_trace(&self, trace_id: &str) -> Result<Option<ExecTrace>, StorageError> {
        let trace_id = trace_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT trace_id, started_ts, finished_ts, status, root_call_id, metadata
                     FROM exec_trace WHERE trace_id = ?1",
                    params![trace_id],
                    |r| {
                        let metadata: String = r.get(5)?;
                        Ok(ExecTrace {
                            trace_id: r.get(0)?,
                            started_ts: r.get(1)?,
                            finished_ts: r.get(2)?,
                            status: trace_status_from_str(&r.get::<_, String>(3)?),
                            root_call_id: r.get(4)?,
                            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn insert_exec_node(&self, node: ExecNode) -> Result<ExecNode, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO exec_node
                    (exec_node_id, trace_id, call_id, name, state, attempt, timeout_ms, started_ts, finished_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    node.exec_node_id,
                    node.trace_id,
                    node.call_id,
                    node.name,
                    node_state_str(node.state),
                    node.attempt,
                    node.timeout_ms,
                    node.started_ts,
                    node.finished_ts
                ],
            )?;
            Ok(node)
        })
        .await
    }

    pub async fn update_exec_node_state(
        &self,
        exec_node_id: &str,
        state: ExecNodeState,
        started_ts: Option<i64>,
        finished_ts: Option<i64>,
    ) -> Result<(), StorageError> {
        let exec_node_id = exec_node_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE exec_node SET state = ?1,
                    started_ts = COALESCE(?2, started_ts),
                    finished_ts = COALESCE(?3, finished_ts)
                 WHERE exec_node_id = ?4",
                params![node_state_str(state), started_ts, finished_ts, exec_node_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_exec_edge(&self, edge: ExecEdge) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO exec_edge (from_exec_node, to_exec_node, condition) VALUES (?1, ?2, ?3)",
                params![edge.from_exec_node, edge.to_exec_node, edge_condition_str(edge.condition)],
            )?;
            Ok(())
        })
        .await
    }

    /// All nodes and edges belonging to one trace, for the `GET /exec/{trace_id}` view.
    pub async fn trace_nodes_and_edges(
        &self,
        trace_id: &str,
    ) -> Result<(Vec<ExecNode>, Vec<ExecEdge>), StorageError> {
        let trace_id = trace_id.to_string();
        self.with_conn(move |conn| {
            let mut node_stmt = conn.prepare(
                "SELECT exec_node_id, trace_id, call_id, name, state, attempt, timeout_ms, started_ts, finished_ts
                 FROM exec_node WHERE trace_id = ?1 ORDER BY started_ts IS NULL, started_ts",
            )?;
            let nodes = node_stmt
                .query_map(params![trace_id], |r| {
                    Ok(ExecNode {
                        exec_node_id: r.get(0)?,
                        trace_id: r.get(1)?,
                        call_id: r.get(2)?,
                        name: r.get(3)?,
                        state: node_state_from_str(&r.get::<_, String>(4)?),
                        attempt: r.get(5)?,
                        timeout_ms: r.get(6)?,
                        started_ts: r.get(7)?,
                        finished_ts: r.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let node_ids: Vec<String> = nodes.iter().map(|n| n.exec_node_id.clone()).collect();
            let mut edges = Vec::new();
            if !node_ids.is_empty() {
                let placeholders = node_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let sql = format!(
                    "SELECT from_exec_node, to_exec_node, condition FROM exec_edge
                     WHERE from_exec_node IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let params_dyn: Vec<&dyn rusqlite::ToSql> =
                    node_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
                let rows = stmt.query_map(params_dyn.as_slice(), |r| {
                    Ok(ExecEdge {
                        from_exec_node: r.get(0)?,
                        to_exec_node: r.get(1)?,
                        condition: edge_condition_from_str(&r.get::<_, String>(2)?),
                    })
                })?;
                for row in rows {
                    edges.push(row?);
                }
            }
            Ok((nodes, edges))
        })
        .await
    }

    pub async fn insert_tool_call(&self, call: ToolCall) -> Result<ToolCall, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tool_call (call_id, tool_name, ts, inputs, outputs, status, trace_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    call.call_id,
                    call.tool_name,
                    call.ts,
                    serde_json::to_string(&call.inputs)?,
                    serde_json::to_string(&call.outputs)?,
                    call_status_str(call.status),
                    call.trace_id
                ],
            )?;
            Ok(call)
        })
        .await
    }

    pub async fn list_tool_calls(
        &self,
        trace_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ToolCall>, StorageError> {
        let trace_id = trace_id.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let rows = if let Some(tid) = &trace_id {
                let mut stmt = conn.prepare(
                    "SELECT call_id, tool_name, ts, inputs, outputs, status, trace_id
                     FROM tool_call WHERE trace_id = ?1 ORDER BY ts LIMIT ?2",
                )?;
                let result = stmt.query_map(params![tid, limit], row_to_call)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            } else {
                let mut stmt = conn.prepare(
                    "SELECT call_id, tool_name, ts, inputs, outputs, status, trace_id
                     FROM tool_call ORDER BY ts DESC LIMIT ?1",
                )?;
                let result = stmt.query_map(params![limit], row_to_call)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            };
            Ok(rows)
        })
        .await
    }
}

fn row_to_call(r: &rusqlite::Row) -> rusqlite::Result<ToolCall> {
    let inputs: String = r.get(3)?;
    let outputs: String = r.get(4)?;
    Ok(ToolCall {
        call_id: r.get(0)?,
        tool_name: r.get(1)?,
        ts: r.get(2)?,
        inputs: serde_json::from_str(&inputs).unwrap_or(Value::Null),
        outputs: serde_json::from_str(&outputs).unwrap_or(Value::Null),
        status: match r.get::<_, String>(5)?.as_str() {
            "error" => ToolCallStatus::Error,
            _ => ToolCallStatus::Ok,
        },
        trace_id: r.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn trace_nodes_and_edges_round_trip() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .insert_trace(ExecTrace {
                trace_id: "t1".into(),
                started_ts: 1,
                finished_ts: None,
                status: TraceStatus::Running,
                root_call_id: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        storage
            .insert_exec_node(ExecNode {
                exec_node_id: "n1".into(),
                trace_id: "t1".into(),
                call_id: None,
                name: "doc_parse".into(),
                state: ExecNodeState::Pending,
                attempt: 1,
                timeout_ms: 5000,
                started_ts: None,
                finished_ts: None,
            })
            .await
            .unwrap();
        storage
            .insert_exec_node(ExecNode {
                exec_node_id: "n2".into(),
                trace_id: "t1".into(),
                call_id: None,
                name: "summarizer".into(),
                state: ExecNodeState::Pending,
                attempt: 1,
                timeout_ms: 5000,
                started_ts: None,
                finished_ts: None,
            })
            .await
            .unwrap();
        storage
            .insert_exec_edge(ExecEdge {
                from_exec_node: "n1".into(),
                to_exec_node: "n2".into(),
                condition: EdgeCondition::OnOk,
            })
            .await
            .unwrap();

        let (nodes, edges) = storage.trace_nodes_and_edges("t1").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.len(), 1);
    }
}
