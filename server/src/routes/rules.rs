use std::collections::HashMap;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppJsonResult;
use crate::store::StoredEmail;
use crate::user_files;
use crate::ServerState;

const RULES_FILE: &str = "inbox_rules.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default)]
    pub mark_read: bool,
    #[serde(default)]
    pub trash: bool,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRule {
    pub name: String,
    #[serde(default)]
    pub senders: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub actions: RuleActions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<InboxRule>,
}

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler_get_rules).post(handler_set_rules))
        .route("/run", post(handler_run_rules))
}

fn load_rules() -> RuleSet {
    user_files::read_json_or_default(RULES_FILE)
}

fn rule_matches(rule: &InboxRule, email: &StoredEmail) -> bool {
    let sender = email.sender.to_lowercase();
    let text = format!("{} {}", email.subject, email.snippet).to_lowercase();

    if rule
        .senders
        .iter()
        .any(|s| sender.contains(&s.to_lowercase()))
    {
        return true;
    }
    if rule
        .keywords
        .iter()
        .any(|k| text.contains(&k.to_lowercase()))
    {
        return true;
    }
    if rule
        .labels
        .iter()
        .any(|l| !email.labels.is_empty() && email.labels.contains(&format!("|{l}|")))
    {
        return true;
    }
    false
}

async fn handler_get_rules() -> AppJsonResult<RuleSet> {
    Ok(Json(load_rules()))
}

async fn handler_set_rules(Json(rules): Json<RuleSet>) -> AppJsonResult<RuleSet> {
    user_files::write_json(RULES_FILE, &rules)?;
    Ok(Json(rules))
}

#[derive(Debug, Deserialize)]
struct RunRulesRequest {
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

async fn handler_run_rules(
    State(state): State<ServerState>,
    Json(req): Json<RunRulesRequest>,
) -> AppJsonResult<Value> {
    let rules = load_rules().rules;
    let emails = state.store.get_all_emails().await?;

    let mut matches: HashMap<String, Vec<String>> = rules
        .iter()
        .map(|r| (r.name.clone(), Vec::new()))
        .collect();
    for email in &emails {
        for rule in &rules {
            if rule_matches(rule, email) {
                matches.get_mut(&rule.name).unwrap().push(email.id.clone());
            }
        }
    }

    let match_counts: HashMap<&String, usize> =
        matches.iter().map(|(name, ids)| (name, ids.len())).collect();
    if req.dry_run {
        return Ok(Json(json!({ "dry_run": true, "matches": match_counts })));
    }

    let client = state.gmail_client().await?;
    for rule in &rules {
        let ids = matches.get(&rule.name).cloned().unwrap_or_default();
        if ids.is_empty() {
            continue;
        }
        if rule.actions.trash {
            for id in &ids {
                client.trash_message(id).await?;
            }
            state.store.delete_emails(&ids).await?;
            state.store.delete_expenses_for_emails(&ids).await?;
        }
        if rule.actions.mark_read {
            let unread = ["UNREAD".to_string()];
            for id in &ids {
                client.modify_message(id, &[], &unread).await?;
            }
        }
        if let Some(label_name) = &rule.actions.label {
            let label_id = super::actions::ensure_label(&client, label_name).await?;
            let add = [label_id];
            for id in &ids {
                client.modify_message(id, &add, &[]).await?;
            }
        }
    }

    state
        .coordinator
        .cache
        .invalidate(&["overview", "senders", "categories", "alerts", "eda"]);
    Ok(Json(json!({ "dry_run": false, "matches": match_counts })))
}
