use std::collections::HashSet;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppJsonResult;
use crate::llm::extractor::ActionItem;
use crate::store::EmailFilter;
use crate::user_files;
use crate::ServerState;

const DISMISSED_FILE: &str = "dismissed_actions.json";

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler_list))
        .route("/dismiss", post(handler_dismiss))
}

fn load_dismissed() -> HashSet<String> {
    user_files::read_json_or_default::<Vec<String>>(DISMISSED_FILE)
        .into_iter()
        .collect()
}

/// Pending action items across the mailbox, dismissed keys filtered out,
/// sorted by deadline.
async fn handler_list(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let filter = EmailFilter {
        has_action_items: Some(true),
        ..Default::default()
    };
    let emails = state.store.get_emails(&filter, None, None).await?;
    let dismissed = load_dismissed();
    let today = Utc::now().date_naive().to_string();

    let mut actions: Vec<Value> = Vec::new();
    for email in &emails {
        let items: Vec<ActionItem> =
            serde_json::from_str(&email.action_items_json).unwrap_or_default();
        for item in items {
            let key = format!("{}:{}", email.id, item.action);
            if dismissed.contains(&key) {
                continue;
            }
            let is_overdue = item.deadline.as_deref().is_some_and(|d| d < today.as_str());
            actions.push(json!({
                "gmail_id": email.id,
                "action": item.action,
                "deadline": item.deadline.clone().unwrap_or_else(|| today.clone()),
                "urgency": item.urgency,
                "subject": email.subject,
                "sender": email.sender,
                "is_overdue": is_overdue,
                "dismiss_key": key,
            }));
        }
    }

    actions.sort_by(|a, b| {
        a["deadline"]
            .as_str()
            .unwrap_or("")
            .cmp(b["deadline"].as_str().unwrap_or(""))
    });
    Ok(Json(json!({ "actions": actions })))
}

#[derive(Debug, Deserialize)]
struct DismissRequest {
    dismiss_key: String,
}

async fn handler_dismiss(Json(req): Json<DismissRequest>) -> AppJsonResult<Value> {
    let mut dismissed = load_dismissed();
    dismissed.insert(req.dismiss_key);
    let as_list: Vec<&String> = dismissed.iter().collect();
    user_files::write_json(DISMISSED_FILE, &as_list)?;
    Ok(Json(json!({ "ok": true })))
}
