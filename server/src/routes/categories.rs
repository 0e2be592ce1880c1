use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::{ApiCache, DEFAULT_TTL};
use crate::categorizer::{self, Categorizer, ALL_CATEGORIES, OTHER};
use crate::error::{AppError, AppJsonResult};
use crate::store::{EmailFilter, EmailPatch};
use crate::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler_list))
        .route("/assign", post(handler_assign_sender))
        .route("/assign-subject", post(handler_assign_subject))
        .route("/custom", get(handler_custom_list).post(handler_custom_create))
        .route(
            "/custom/:name",
            put(handler_custom_rename).delete(handler_custom_delete),
        )
}

fn invalidate_category_caches(cache: &ApiCache) {
    cache.invalidate(&["overview", "categories", "senders", "alerts", "eda"]);
}

/// Per-category sender rollup with the user's overrides alongside.
async fn handler_list(State(state): State<ServerState>) -> AppJsonResult<Vec<Value>> {
    let cache = &state.coordinator.cache;
    if let Some(cached) = cache.get("categories_detail", DEFAULT_TTL) {
        return Ok(Json(cached.as_array().cloned().unwrap_or_default()));
    }

    let categorizer = Categorizer::load();
    let emails = state.store.get_all_emails().await?;

    struct SenderEntry {
        count: usize,
        last_date: String,
    }
    let mut cat_senders: HashMap<String, HashMap<String, SenderEntry>> = HashMap::new();
    for email in &emails {
        if email.sender.is_empty() {
            continue;
        }
        let cat = if email.category.is_empty() {
            OTHER.to_string()
        } else {
            email.category.clone()
        };
        let entry = cat_senders
            .entry(cat)
            .or_default()
            .entry(email.sender.clone())
            .or_insert(SenderEntry {
                count: 0,
                last_date: String::new(),
            });
        entry.count += 1;
        if email.date_iso > entry.last_date {
            entry.last_date = email.date_iso.clone();
        }
    }

    let overrides = categorizer.sender_overrides();
    let mut result = Vec::new();
    for cat in categorizer.all_category_names() {
        let Some(senders) = cat_senders.get(&cat) else {
            continue;
        };
        let mut rows: Vec<Value> = senders
            .iter()
            .map(|(sender, e)| {
                json!({"sender": sender, "count": e.count, "last_date": e.last_date})
            })
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r["count"].as_u64().unwrap_or(0)));
        let total: usize = senders.values().map(|e| e.count).sum();
        let cat_overrides: HashMap<&String, &String> = overrides
            .iter()
            .filter(|(sender, _)| senders.contains_key(*sender))
            .collect();
        rows.truncate(100);
        result.push(json!({
            "category": cat,
            "count": total,
            "senders": rows,
            "overrides": cat_overrides,
        }));
    }

    cache.set("categories_detail", Value::Array(result.clone()));
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    sender: String,
    category: String,
}

async fn handler_assign_sender(
    State(state): State<ServerState>,
    Json(req): Json<AssignRequest>,
) -> AppJsonResult<Value> {
    let categorizer = Categorizer::load();
    if !categorizer.is_known_category(&req.category) {
        return Err(AppError::BadRequest(format!(
            "Unknown category: {}",
            req.category
        )));
    }

    categorizer::set_sender_override(&req.sender, &req.category)?;
    let updated = recategorize_sender(&state, &req.sender, &req.category).await?;

    invalidate_category_caches(&state.coordinator.cache);
    state.coordinator.cache.invalidate(&["categories_detail"]);
    tracing::info!(
        "Assigned {} -> {} ({} emails)",
        req.sender,
        req.category,
        updated
    );
    Ok(Json(json!({
        "updated": updated,
        "sender": req.sender,
        "category": req.category,
    })))
}

async fn recategorize_sender(
    state: &ServerState,
    sender: &str,
    category: &str,
) -> Result<usize, AppError> {
    let filter = EmailFilter {
        sender: Some(sender.to_string()),
        ..Default::default()
    };
    let ids = state.store.get_all_ids(Some(&filter)).await?;
    let patches: Vec<(String, EmailPatch)> = ids
        .iter()
        .map(|id| {
            (
                id.clone(),
                EmailPatch {
                    category: Some(category.to_string()),
                    ..Default::default()
                },
            )
        })
        .collect();
    let updated = patches.len();
    state.store.update_emails_batch(patches).await?;
    Ok(updated)
}

#[derive(Debug, Deserialize)]
struct AssignSubjectRequest {
    subject: String,
    category: String,
}

async fn handler_assign_subject(
    State(state): State<ServerState>,
    Json(req): Json<AssignSubjectRequest>,
) -> AppJsonResult<Value> {
    let categorizer = Categorizer::load();
    if !categorizer.is_known_category(&req.category) {
        return Err(AppError::BadRequest(format!(
            "Unknown category: {}",
            req.category
        )));
    }
    categorizer::set_subject_override(&req.subject, &req.category)?;

    invalidate_category_caches(&state.coordinator.cache);
    Ok(Json(json!({
        "subject": req.subject,
        "category": req.category,
    })))
}

async fn handler_custom_list(State(_state): State<ServerState>) -> AppJsonResult<Value> {
    let categorizer = Categorizer::load();
    Ok(Json(json!(categorizer.custom_categories())))
}

#[derive(Debug, Deserialize)]
struct CustomCategoryRequest {
    name: String,
    #[serde(default = "default_color")]
    color: String,
}

fn default_color() -> String {
    "#888888".to_string()
}

async fn handler_custom_create(
    State(state): State<ServerState>,
    Json(req): Json<CustomCategoryRequest>,
) -> AppJsonResult<Value> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Category name is empty".to_string()));
    }
    if ALL_CATEGORIES.contains(&req.name.as_str()) {
        return Err(AppError::BadRequest(format!(
            "{} is a built-in category",
            req.name
        )));
    }

    let categorizer = Categorizer::load();
    let mut custom = categorizer.custom_categories().clone();
    custom.insert(req.name.clone(), req.color.clone());
    categorizer::save_custom_categories(&custom)?;

    invalidate_category_caches(&state.coordinator.cache);
    Ok(Json(json!({ "name": req.name, "color": req.color })))
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    new_name: String,
}

/// Rename a custom category; every stored email carrying the old name moves
/// with it.
async fn handler_custom_rename(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(req): Json<RenameRequest>,
) -> AppJsonResult<Value> {
    if ALL_CATEGORIES.contains(&name.as_str()) {
        return Err(AppError::BadRequest(
            "Built-in categories cannot be renamed".to_string(),
        ));
    }
    let categorizer = Categorizer::load();
    let mut custom = categorizer.custom_categories().clone();
    let Some(color) = custom.remove(&name) else {
        return Err(AppError::NotFound(format!("Unknown category: {name}")));
    };
    custom.insert(req.new_name.clone(), color);
    categorizer::save_custom_categories(&custom)?;

    let updated = recategorize_category(&state, &name, &req.new_name).await?;

    invalidate_category_caches(&state.coordinator.cache);
    state.coordinator.cache.invalidate(&["categories_detail"]);
    Ok(Json(json!({
        "renamed": name,
        "to": req.new_name,
        "updated": updated,
    })))
}

/// Delete a custom category; its emails fall back to Other.
async fn handler_custom_delete(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> AppJsonResult<Value> {
    if ALL_CATEGORIES.contains(&name.as_str()) {
        return Err(AppError::BadRequest(
            "Built-in categories cannot be deleted".to_string(),
        ));
    }
    let categorizer = Categorizer::load();
    let mut custom = categorizer.custom_categories().clone();
    if custom.remove(&name).is_none() {
        return Err(AppError::NotFound(format!("Unknown category: {name}")));
    }
    categorizer::save_custom_categories(&custom)?;

    let updated = recategorize_category(&state, &name, OTHER).await?;

    invalidate_category_caches(&state.coordinator.cache);
    state.coordinator.cache.invalidate(&["categories_detail"]);
    Ok(Json(json!({ "deleted": name, "updated": updated })))
}

async fn recategorize_category(
    state: &ServerState,
    from: &str,
    to: &str,
) -> Result<usize, AppError> {
    let filter = EmailFilter {
        category: Some(from.to_string()),
        ..Default::default()
    };
    let ids = state.store.get_all_ids(Some(&filter)).await?;
    let patches: Vec<(String, EmailPatch)> = ids
        .iter()
        .map(|id| {
            (
                id.clone(),
                EmailPatch {
                    category: Some(to.to_string()),
                    ..Default::default()
                },
            )
        })
        .collect();
    let updated = patches.len();
    state.store.update_emails_batch(patches).await?;
    Ok(updated)
}
