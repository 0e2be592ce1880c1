use std::collections::HashSet;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppJsonResult;
use crate::user_files;
use crate::ServerState;

const RULES_FILE: &str = "alert_rules.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderRule {
    pub sender: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertRules {
    #[serde(default)]
    pub senders: Vec<SenderRule>,
}

pub fn load_alert_rules() -> AlertRules {
    user_files::read_json_or_default(RULES_FILE)
}

pub fn router() -> Router<ServerState> {
    Router::new().route("/rules", get(handler_get_rules).put(handler_set_rules))
}

async fn handler_get_rules() -> AppJsonResult<AlertRules> {
    Ok(Json(load_alert_rules()))
}

async fn handler_set_rules(
    State(state): State<ServerState>,
    Json(rules): Json<AlertRules>,
) -> AppJsonResult<AlertRules> {
    let mut seen: HashSet<String> = HashSet::new();
    let deduped: Vec<SenderRule> = rules
        .senders
        .into_iter()
        .filter(|rule| seen.insert(rule.sender.clone()))
        .collect();
    let data = AlertRules { senders: deduped };
    user_files::write_json(RULES_FILE, &data)?;
    state.coordinator.cache.invalidate(&["alerts"]);
    Ok(Json(data))
}
