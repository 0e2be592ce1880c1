use std::collections::BTreeMap;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::DEFAULT_TTL;
use crate::error::{AppError, AppJsonResult};
use crate::expenses::rules::{self, ExpenseRules};
use crate::store::to_blob;
use crate::ServerState;
use entity::expense;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/rules", get(handler_get_rules).post(handler_set_rules))
        .route("/reprocess", post(handler_reprocess))
        .route("/override", post(handler_override))
        .route("/transactions", get(handler_transactions))
        .route("/overview", get(handler_overview))
}

async fn handler_get_rules() -> AppJsonResult<ExpenseRules> {
    Ok(Json(rules::load_rules()))
}

async fn handler_set_rules(
    State(state): State<ServerState>,
    Json(new_rules): Json<ExpenseRules>,
) -> AppJsonResult<ExpenseRules> {
    rules::save_rules(&new_rules)?;
    state
        .coordinator
        .cache
        .invalidate(&["expenses_overview", "expenses_tx"]);
    Ok(Json(new_rules))
}

async fn handler_reprocess(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let summary = rules::reprocess(&state.store, state.embedder.clone()).await?;
    state
        .coordinator
        .cache
        .invalidate(&["expenses_overview", "expenses_tx"]);
    Ok(Json(json!(summary)))
}

#[derive(Debug, Deserialize)]
struct ExpenseOverride {
    gmail_id: Option<String>,
    amount: f64,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    merchant: String,
    #[serde(default = "default_category")]
    category: String,
    date_iso: Option<String>,
    #[serde(default)]
    notes: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_category() -> String {
    "Uncategorized".to_string()
}

/// Manual expense record; persists until explicitly replaced.
async fn handler_override(
    State(state): State<ServerState>,
    Json(req): Json<ExpenseOverride>,
) -> AppJsonResult<Value> {
    let expense_id = req
        .gmail_id
        .clone()
        .unwrap_or_else(|| format!("manual_{}", uuid::Uuid::new_v4().simple()));
    let date_iso = req
        .date_iso
        .clone()
        .unwrap_or_else(|| Utc::now().to_rfc3339());
    let date_timestamp = DateTime::parse_from_rfc3339(&date_iso)
        .map_err(|e| AppError::BadRequest(format!("Invalid date_iso: {e}")))?
        .timestamp();

    let document = format!(
        "{} {} {} {}",
        req.merchant, req.category, req.amount, req.currency
    )
    .trim()
    .to_string();
    let embedder = state.embedder.clone();
    let doc = document.clone();
    let vector = tokio::task::spawn_blocking(move || embedder.encode(&doc))
        .await
        .context("embedding task panicked")??;

    let row = expense::Model {
        id: expense_id.clone(),
        document,
        embedding: Some(to_blob(&vector)),
        amount: req.amount,
        currency: req.currency,
        merchant: req.merchant,
        category: req.category,
        source_sender: String::new(),
        labels: String::new(),
        date_iso,
        date_timestamp,
        confidence: 1.0,
        rule_name: "manual".to_string(),
        source: "manual".to_string(),
        source_gmail_id: req.gmail_id.unwrap_or_default(),
        thread_id: String::new(),
        subject: String::new(),
        notes: req.notes,
    };
    state.store.upsert_expenses_batch(vec![row.clone()]).await?;
    state
        .coordinator
        .cache
        .invalidate(&["expenses_overview", "expenses_tx"]);
    Ok(Json(json!(row)))
}

#[derive(Debug, Deserialize)]
struct TransactionsQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    category: Option<String>,
    sender: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    50
}

fn parse_bound(raw: &Option<String>) -> Option<i64> {
    raw.as_deref()
        .and_then(|r| DateTime::parse_from_rfc3339(r).ok())
        .map(|dt| dt.timestamp())
}

async fn handler_transactions(
    State(state): State<ServerState>,
    Query(query): Query<TransactionsQuery>,
) -> AppJsonResult<Value> {
    let limit = query.limit.min(1000);
    let page = query.page.max(1);
    let date_from = parse_bound(&query.date_from);
    let date_to = parse_bound(&query.date_to);

    let mut expenses = state.store.get_all_expenses().await?;
    expenses.retain(|e| {
        query
            .category
            .as_deref()
            .map_or(true, |c| e.category.eq_ignore_ascii_case(c))
            && query
                .sender
                .as_deref()
                .map_or(true, |s| e.source_sender.to_lowercase().contains(&s.to_lowercase()))
            && date_from.map_or(true, |b| e.date_timestamp >= b)
            && date_to.map_or(true, |b| e.date_timestamp <= b)
    });
    expenses.sort_by_key(|e| std::cmp::Reverse(e.date_timestamp));

    let total = expenses.len();
    let page_rows: Vec<expense::Model> = expenses
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();

    Ok(Json(json!({
        "transactions": page_rows,
        "page": page,
        "limit": limit,
        "total": total,
    })))
}

/// Spend rollup: totals per currency, category and month, top merchants.
async fn handler_overview(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("expenses_overview", DEFAULT_TTL) {
        return Ok(Json(cached));
    }

    let expenses = state.store.get_all_expenses().await?;
    let mut by_currency: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_category: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_month: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_merchant: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_source: BTreeMap<String, usize> = BTreeMap::new();

    for e in &expenses {
        *by_currency.entry(e.currency.clone()).or_insert(0.0) += e.amount;
        *by_category.entry(e.category.clone()).or_insert(0.0) += e.amount;
        if let Ok(dt) = DateTime::parse_from_rfc3339(&e.date_iso) {
            *by_month.entry(dt.format("%Y-%m").to_string()).or_insert(0.0) += e.amount;
        }
        if !e.merchant.is_empty() {
            *by_merchant.entry(e.merchant.clone()).or_insert(0.0) += e.amount;
        }
        *by_source.entry(e.source.clone()).or_insert(0) += 1;
    }

    let mut top_merchants: Vec<(String, f64)> = by_merchant.into_iter().collect();
    top_merchants.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    top_merchants.truncate(15);

    let result = json!({
        "count": expenses.len(),
        "by_currency": by_currency,
        "by_category": by_category,
        "by_month": by_month,
        "top_merchants": top_merchants
            .into_iter()
            .map(|(merchant, amount)| json!({"merchant": merchant, "amount": amount}))
            .collect::<Vec<_>>(),
        "by_source": by_source,
    });
    cache.set("expenses_overview", result.clone());
    Ok(Json(result))
}
