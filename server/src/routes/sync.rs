use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::SYNC_CACHE_KEYS;
use crate::categorizer::{Categorizer, EmailSignals};
use crate::error::AppJsonResult;
use crate::ingestion::FullSyncOptions;
use crate::store::EmailPatch;
use crate::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/start", post(handler_start))
        .route("/incremental", post(handler_incremental))
        .route("/status", get(handler_status))
        .route("/progress", get(handler_progress))
        .route("/events", get(handler_events))
        .route("/live-count", get(handler_live_count))
        .route("/categorize", post(handler_categorize))
        .route("/llm-process", post(handler_llm_process).get(handler_llm_status))
        .route("/reindex", post(handler_reindex))
        .route("/auto", get(handler_get_auto).post(handler_set_auto))
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    #[serde(default = "default_max_emails")]
    max_emails: usize,
    #[serde(default = "default_days_ago")]
    days_ago: Option<i64>,
    #[serde(default)]
    query: String,
}

fn default_max_emails() -> usize {
    100_000
}

fn default_days_ago() -> Option<i64> {
    Some(90)
}

async fn handler_start(
    State(state): State<ServerState>,
    Json(req): Json<SyncRequest>,
) -> AppJsonResult<Value> {
    let options = FullSyncOptions {
        query: req.query,
        max_emails: req.max_emails,
        days_ago: req.days_ago,
        ..Default::default()
    };
    let started = state.coordinator.start_full(state.clone(), options);
    Ok(Json(json!({
        "message": if started { "Sync started" } else { "Sync already in progress" }
    })))
}

async fn handler_incremental(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let started = state.coordinator.start_incremental(state.clone());
    Ok(Json(json!({
        "message": if started { "Incremental sync started" } else { "Sync already in progress" }
    })))
}

async fn handler_status(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let sync_state = state.store.get_sync_state().await?;
    let total = state.store.count().await?;
    Ok(Json(json!({
        "last_sync": sync_state.as_ref().map(|s| s.last_full_sync.clone()),
        "total_emails": total,
        "is_syncing": state.coordinator.is_syncing(),
        "has_history_id": sync_state.map_or(false, |s| !s.last_history_id.is_empty()),
    })))
}

async fn handler_progress(State(state): State<ServerState>) -> AppJsonResult<Value> {
    Ok(Json(state.coordinator.progress()))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    after: Option<String>,
}

async fn handler_events(
    State(state): State<ServerState>,
    Query(query): Query<EventsQuery>,
) -> AppJsonResult<Value> {
    let (events, is_syncing) = state.coordinator.events_after(query.after.as_deref());
    Ok(Json(json!({ "events": events, "is_syncing": is_syncing })))
}

async fn handler_live_count(State(state): State<ServerState>) -> AppJsonResult<Value> {
    Ok(Json(json!({ "count": state.store.count().await? })))
}

/// Re-run the heuristic categorizer over every stored email.
async fn handler_categorize(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let categorizer = Categorizer::load();
    let emails = state.store.get_all_emails().await?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    let patches = emails
        .iter()
        .map(|email| {
            let category = categorizer.categorize(EmailSignals::from_stored(email));
            *counts.entry(category.clone()).or_insert(0) += 1;
            (
                email.id.clone(),
                EmailPatch {
                    category: Some(category),
                    ..Default::default()
                },
            )
        })
        .collect::<Vec<_>>();

    let updated = patches.len();
    state.store.update_emails_batch(patches).await?;
    state.coordinator.cache.invalidate(&SYNC_CACHE_KEYS);
    tracing::info!("Recategorized {} emails", updated);
    Ok(Json(json!({ "updated": updated, "categories": counts })))
}

#[derive(Debug, Default, Deserialize)]
struct LlmProcessRequest {
    #[serde(default)]
    force: bool,
}

async fn handler_llm_process(
    State(state): State<ServerState>,
    req: Option<Json<LlmProcessRequest>>,
) -> AppJsonResult<Value> {
    let force = req.map_or(false, |Json(r)| r.force);
    let started = state.coordinator.start_llm_process(state.clone(), force);
    Ok(Json(json!({
        "message": if started { "LLM processing started" } else { "LLM processing already in progress" }
    })))
}

async fn handler_llm_status(State(state): State<ServerState>) -> AppJsonResult<Value> {
    Ok(Json(state.coordinator.llm_status()))
}

async fn handler_reindex(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let started = state.coordinator.start_reindex(state.clone());
    Ok(Json(json!({
        "message": if started { "Reindex started" } else { "Sync already in progress" }
    })))
}

async fn handler_get_auto(State(state): State<ServerState>) -> AppJsonResult<Value> {
    Ok(Json(state.coordinator.auto_status()))
}

#[derive(Debug, Deserialize)]
struct AutoSyncRequest {
    enabled: bool,
}

async fn handler_set_auto(
    State(state): State<ServerState>,
    Json(req): Json<AutoSyncRequest>,
) -> AppJsonResult<Value> {
    Ok(Json(state.coordinator.set_auto(req.enabled)))
}
