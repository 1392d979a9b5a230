//! `GET /digest` and `GET /feed/today` (spec.md §4.F, §6). Neither endpoint
//! names an algorithm in the surrounding text, so both are built directly on
//! top of [`echogarden_core::storage`]: a time-windowed card pull, entity
//! frequency counted from the `entities` array each card's metadata already
//! carries (populated by the extractor step at ingest time), and action
//! items pulled the same way rather than through a separate reminder store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use echogarden_core::model::{now_ts, MemoryCard};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiResult;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const DIGEST_POOL: i64 = 500;

fn window_ms(window: &str) -> i64 {
    match window {
        "7d" => 7 * DAY_MS,
        "30d" => 30 * DAY_MS,
        _ => DAY_MS,
    }
}

fn top_entities(cards: &[MemoryCard], limit: usize) -> Vec<Value> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for card in cards {
        if let Some(entities) = card.metadata.get("entities").and_then(|v| v.as_array()) {
            for e in entities {
                let name = e.as_str().map(str::to_string).or_else(|| {
                    e.get("name").or_else(|| e.get("text")).and_then(|v| v.as_str()).map(str::to_string)
                });
                if let Some(name) = name {
                    *counts.entry(name).or_default() += 1;
                }
            }
        }
    }
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked.into_iter().map(|(name, count)| json!({"name": name, "count": count})).collect()
}

fn action_reminders(cards: &[MemoryCard]) -> Vec<Value> {
    cards
        .iter()
        .filter_map(|c| {
            let actions = c.metadata.get("actions")?.as_array()?;
            if actions.is_empty() {
                return None;
            }
            Some(json!({"memory_id": c.memory_id, "summary": c.summary, "actions": actions}))
        })
        .collect()
}

#[derive(Deserialize)]
pub struct DigestQuery {
    #[serde(default)]
    window: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn digest(State(state): State<Arc<AppState>>, Query(q): Query<DigestQuery>) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(20).clamp(1, 200);
    let since = now_ts() - window_ms(q.window.as_deref().unwrap_or("24h"));
    let cards: Vec<MemoryCard> = state
        .storage
        .recent_cards(DIGEST_POOL)
        .await?
        .into_iter()
        .filter(|c| c.created_at >= since)
        .collect();

    let mut by_type: HashMap<String, u64> = HashMap::new();
    for c in &cards {
        *by_type.entry(c.card_type.clone()).or_default() += 1;
    }

    Ok(Json(json!({
        "cards": cards.iter().take(limit as usize).collect::<Vec<_>>(),
        "top_entities": top_entities(&cards, 10),
        "reminders": action_reminders(&cards),
        "clusters": by_type.into_iter().map(|(card_type, count)| json!({"card_type": card_type, "count": count})).collect::<Vec<_>>(),
    })))
}

pub async fn feed_today(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let since = now_ts() - DAY_MS;
    let cards: Vec<MemoryCard> = state
        .storage
        .recent_cards(DIGEST_POOL)
        .await?
        .into_iter()
        .filter(|c| c.created_at >= since)
        .collect();

    let mut by_type: HashMap<String, u64> = HashMap::new();
    for c in &cards {
        *by_type.entry(c.card_type.clone()).or_default() += 1;
    }

    Ok(Json(json!({
        "date": chrono::Utc::now().date_naive().to_string(),
        "reminders": action_reminders(&cards),
        "recent_memories": cards.iter().take(20).collect::<Vec<_>>(),
        "emerging_topics": top_entities(&cards, 10),
        "activity_summary": by_type,
    })))
}
