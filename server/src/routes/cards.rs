//! `GET /cards`, `GET /cards/{id}`, `GET /cards/{id}/open`, `GET /blobs/{id}`
//! (spec.md §4.A, §6).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use echogarden_core::error::ApiError;
use echogarden_core::model::Blob;
use echogarden_core::storage::CardFilter;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct ListCardsQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

pub async fn list_cards(State(state): State<Arc<AppState>>, Query(q): Query<ListCardsQuery>) -> ApiResult<Json<serde_json::Value>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    if let Some(query) = q.q.filter(|s| !s.trim().is_empty()) {
        let hits = state.storage.search_cards(&query, limit).await?;
        let cards: Vec<_> = hits.into_iter().map(|(c, rank)| json!({"card": c, "rank": rank})).collect();
        return Ok(Json(json!({"cards": cards})));
    }
    let filter = CardFilter { source_type: q.source_type, card_type: q.card_type };
    let cards = state.storage.list_cards(filter, limit, q.offset.unwrap_or(0)).await?;
    Ok(Json(json!({"cards": cards})))
}

pub async fn get_card(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let card = state
        .storage
        .get_card(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("memory_card {id}")))?;
    Ok(Json(json!({"card": card})))
}

/// Resolves the blob backing a card, if the card was derived from one
/// (direct-text cards carry no blob and 404 here).
async fn resolve_card_blob(state: &AppState, memory_id: &str) -> Result<Blob, ApiError> {
    let card = state
        .storage
        .get_card(memory_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("memory_card {memory_id}")))?;
    let blob_id = card
        .metadata
        .get("blob_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::NotFound(format!("memory_card {memory_id} has no backing blob")))?;
    state
        .storage
        .find_blob(blob_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("blob {blob_id}")))
}

pub async fn open_card(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Response> {
    let blob = resolve_card_blob(&state, &id).await?;
    stream_blob_file(blob).await
}

pub async fn stream_blob(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Response> {
    let blob = state
        .storage
        .find_blob(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("blob {id}")))?;
    stream_blob_file(blob).await
}

async fn stream_blob_file(blob: Blob) -> ApiResult<Response> {
    let file = tokio::fs::File::open(&blob.path)
        .await
        .map_err(|e| ApiError::Internal(format!("opening blob {}: {e}", blob.path)))?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [(header::CONTENT_TYPE, blob.mime.clone())],
        body,
    )
        .into_response())
}
