//! The `Tool` trait (spec.md §4.B). Grounded on the origin crate's
//! `tools/trait.rs`: a name, a spec for introspection, and an async call.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;

/// Introspection payload for `GET /tools/{name}/schema`.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Runs the tool. Callers go through [`crate::tools::ToolRegistry::dispatch`],
    /// never this method directly, so every call is recorded as a `ToolCall` row.
    async fn call(&self, input: Value) -> Result<Value, ToolError>;
}
