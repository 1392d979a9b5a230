//! `ToolRegistry` (spec.md §4.B), grounded on the sibling
//! `graphweave::tools::registry::ToolRegistry` / `ToolRegistryLocked` pattern:
//! a `HashMap<String, Box<dyn Tool>>` behind a `tokio::sync::RwLock` so the
//! HTTP surface and the orchestrator can share one registry concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ToolError;
use crate::model::{new_id, now_ts, ToolCall, ToolCallStatus};
use crate::storage::Storage;

use super::traits::{Tool, ToolSpec};

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    storage: Storage,
}

impl ToolRegistry {
    pub fn new(storage: Storage) -> Self {
        Self { tools: HashMap::new(), storage }
    }

    /// Init-time registration. Panics on a duplicate name — that is a
    /// programming error, not a runtime condition callers can recover from.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            panic!("tool '{name}' registered twice");
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_schema(&self, name: &str) -> Result<ToolSpec, ToolError> {
        self.tools
            .get(name)
            .map(|t| t.spec())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Dispatches `name(inputs)`, recording a `ToolCall` row with timing,
    /// status, and input/output snapshots regardless of outcome. Every
    /// ingestion step and every chat step must go through here.
    pub async fn dispatch(
        &self,
        name: &str,
        inputs: Value,
        trace_id: Option<&str>,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?
            .clone();
        let ts = now_ts();
        let result = tool.call(inputs.clone()).await;
        let (status, outputs) = match &result {
            Ok(out) => (ToolCallStatus::Ok, out.clone()),
            Err(e) => (ToolCallStatus::Error, Value::String(e.to_string())),
        };
        let call = ToolCall {
            call_id: new_id(),
            tool_name: name.to_string(),
            ts,
            inputs,
            outputs,
            status,
            trace_id: trace_id.map(|s| s.to_string()),
        };
        if let Err(e) = self.storage.insert_tool_call(call).await {
            tracing::warn!(tool = name, error = %e, "failed to record tool_call row");
        }
        result
    }
}

/// Shared handle to a registry, cheap to clone.
#[derive(Clone)]
pub struct ToolRegistryLocked(Arc<RwLock<ToolRegistry>>);

impl ToolRegistryLocked {
    pub fn new(registry: ToolRegistry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, ToolRegistry> {
        self.0.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, ToolRegistry> {
        self.0.write().await
    }

    pub async fn dispatch(
        &self,
        name: &str,
        inputs: Value,
        trace_id: Option<&str>,
    ) -> Result<Value, ToolError> {
        self.0.read().await.dispatch(name, inputs, trace_id).await
    }

    pub async fn names(&self) -> Vec<String> {
        self.0.read().await.names()
    }

    pub async fn get_schema(&self, name: &str) -> Result<ToolSpec, ToolError> {
        self.0.read().await.get_schema(name)
    }
}
