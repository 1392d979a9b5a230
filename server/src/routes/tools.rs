//! `GET /tools`, `GET /tools/{name}/schema`, `POST /tools/{name}/run`
//! (spec.md §4.B, §6) — the tool registry exposed over HTTP for manual
//! invocation and debugging.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use echogarden_core::error::ApiError;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"tools": state.registry.names().await}))
}

pub async fn tool_schema(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    let spec = state.registry.get_schema(&name).await.map_err(ApiError::from)?;
    Ok(Json(json!({
        "name": spec.name,
        "description": spec.description,
        "input_schema": spec.input_schema,
        "output_schema": spec.output_schema,
    })))
}

#[derive(Deserialize)]
pub struct RunToolRequest {
    #[serde(default)]
    inputs: Value,
}

pub async fn run_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<RunToolRequest>,
) -> ApiResult<Json<Value>> {
    let outputs = state.registry.dispatch(&name, req.inputs, None).await.map_err(ApiError::from)?;
    let recent = state.storage.list_tool_calls(None, 1).await?;
    let call_id = recent.first().map(|c| c.call_id.clone());
    Ok(Json(json!({"outputs": outputs, "call_id": call_id})))
}
