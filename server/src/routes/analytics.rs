use std::collections::HashSet;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::analytics;
use crate::cache::{DEFAULT_TTL, SHORT_TTL};
use crate::categorizer::Categorizer;
use crate::error::AppJsonResult;
use crate::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/overview", get(handler_overview))
        .route("/senders", get(handler_senders))
        .route("/subscriptions", get(handler_subscriptions))
        .route("/labels", get(handler_labels))
        .route("/categories", get(handler_categories))
        .route("/alerts", get(handler_alerts))
        .route("/triage", get(handler_triage))
        .route("/eda", get(handler_eda))
}

async fn handler_overview(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("overview", SHORT_TTL) {
        return Ok(Json(cached));
    }
    let emails = state.store.get_all_emails().await?;
    let result = analytics::overview(&emails, &Categorizer::load());
    cache.set("overview", result.clone());
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn sender_analytics_cached(state: &ServerState) -> AppJsonResult<Vec<Value>> {
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("senders", DEFAULT_TTL) {
        return Ok(Json(cached.as_array().cloned().unwrap_or_default()));
    }
    let emails = state.store.get_all_emails().await?;
    let result = analytics::sender_analytics(&emails, 1000);
    cache.set("senders", Value::Array(result.clone()));
    Ok(Json(result))
}

async fn handler_senders(
    State(state): State<ServerState>,
    Query(query): Query<LimitQuery>,
) -> AppJsonResult<Vec<Value>> {
    let Json(mut senders) = sender_analytics_cached(&state).await?;
    senders.truncate(query.limit.unwrap_or(200).min(1000));
    Ok(Json(senders))
}

async fn handler_subscriptions(State(state): State<ServerState>) -> AppJsonResult<Vec<Value>> {
    let Json(senders) = sender_analytics_cached(&state).await?;
    Ok(Json(
        senders
            .into_iter()
            .filter(|s| s["is_subscription"] == true)
            .collect(),
    ))
}

async fn handler_labels(State(state): State<ServerState>) -> AppJsonResult<Vec<Value>> {
    let emails = state.store.get_all_emails().await?;
    Ok(Json(analytics::count_by_label(&emails)))
}

async fn handler_categories(State(state): State<ServerState>) -> AppJsonResult<Vec<Value>> {
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("categories", DEFAULT_TTL) {
        return Ok(Json(cached.as_array().cloned().unwrap_or_default()));
    }
    let emails = state.store.get_all_emails().await?;
    let result = analytics::categories_with_counts(&emails, &Categorizer::load());
    cache.set("categories", Value::Array(result.clone()));
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

async fn handler_alerts(
    State(state): State<ServerState>,
    Query(query): Query<AlertsQuery>,
) -> AppJsonResult<Vec<Value>> {
    let limit = query.limit.unwrap_or(500).min(2000);
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("alerts", DEFAULT_TTL) {
        let mut alerts = cached.as_array().cloned().unwrap_or_default();
        alerts.truncate(limit);
        return Ok(Json(alerts));
    }

    let rules = super::load_alert_rules();
    let pinned: HashSet<String> = rules.senders.into_iter().map(|s| s.sender).collect();
    let emails = state.store.get_all_emails().await?;
    let result = analytics::alerts(&emails, &pinned);
    cache.set("alerts", Value::Array(result.clone()));

    let mut alerts = result;
    alerts.truncate(limit);
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
struct TriageQuery {
    days: Option<i64>,
}

async fn handler_triage(
    State(state): State<ServerState>,
    Query(query): Query<TriageQuery>,
) -> AppJsonResult<Value> {
    let days = query.days.unwrap_or(7).clamp(1, 30);
    let cache_key = format!("triage_{days}");
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get(&cache_key, DEFAULT_TTL) {
        return Ok(Json(cached));
    }
    let emails = state.store.get_all_emails().await?;
    let result = analytics::triage(&emails, days);
    cache.set(&cache_key, result.clone());
    Ok(Json(result))
}

async fn handler_eda(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("eda", SHORT_TTL) {
        return Ok(Json(cached));
    }
    let emails = state.store.get_all_emails().await?;
    let result = analytics::eda(&emails);
    cache.set("eda", result.clone());
    Ok(Json(result))
}
