use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppJsonResult;
use crate::store::EmailFilter;
use crate::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/trash", post(handler_trash))
        .route("/mark-read", post(handler_mark_read))
        .route("/label", post(handler_label))
        .route("/trash-sender", post(handler_trash_sender))
}

#[derive(Debug, Deserialize)]
struct IdsRequest {
    ids: Vec<String>,
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Deserialize)]
struct LabelRequest {
    ids: Vec<String>,
    label_name: String,
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Deserialize)]
struct SenderRequest {
    sender: String,
    #[serde(default)]
    confirm: bool,
}

async fn handler_trash(
    State(state): State<ServerState>,
    Json(req): Json<IdsRequest>,
) -> AppJsonResult<Value> {
    if !req.confirm {
        return Ok(Json(json!({
            "preview": true,
            "would_trash": req.ids.len(),
            "ids": req.ids,
        })));
    }

    tracing::info!("Trashing {} messages", req.ids.len());
    let client = state.gmail_client().await?;
    for id in &req.ids {
        client.trash_message(id).await?;
    }
    state.store.delete_emails(&req.ids).await?;
    state.store.delete_expenses_for_emails(&req.ids).await?;
    Ok(Json(json!({ "trashed": req.ids.len() })))
}

async fn handler_mark_read(
    State(state): State<ServerState>,
    Json(req): Json<IdsRequest>,
) -> AppJsonResult<Value> {
    if !req.confirm {
        return Ok(Json(json!({
            "preview": true,
            "would_mark_read": req.ids.len(),
            "ids": req.ids,
        })));
    }

    tracing::info!("Marking {} messages as read", req.ids.len());
    let client = state.gmail_client().await?;
    let unread = ["UNREAD".to_string()];
    let mut patches = Vec::new();
    for id in &req.ids {
        client.modify_message(id, &[], &unread).await?;
        patches.push((
            id.clone(),
            crate::store::EmailPatch {
                is_read: Some(true),
                ..Default::default()
            },
        ));
    }
    state.store.update_emails_batch(patches).await?;
    Ok(Json(json!({ "marked_read": req.ids.len() })))
}

async fn handler_label(
    State(state): State<ServerState>,
    Json(req): Json<LabelRequest>,
) -> AppJsonResult<Value> {
    if !req.confirm {
        return Ok(Json(json!({
            "preview": true,
            "would_label": req.ids.len(),
            "label_name": req.label_name,
            "ids": req.ids,
        })));
    }

    tracing::info!(
        "Applying label '{}' to {} messages",
        req.label_name,
        req.ids.len()
    );
    let client = state.gmail_client().await?;
    let label_id = ensure_label(&client, &req.label_name).await?;
    let add = [label_id.clone()];
    for id in &req.ids {
        client.modify_message(id, &add, &[]).await?;
    }
    Ok(Json(json!({ "labeled": req.ids.len(), "label_id": label_id })))
}

pub async fn ensure_label(
    client: &crate::gmail::client::GmailClient,
    name: &str,
) -> Result<String, crate::error::AppError> {
    let labels = client.list_labels().await?;
    if let Some(id) = labels
        .into_iter()
        .find(|l| l.name.as_deref() == Some(name))
        .and_then(|l| l.id)
    {
        return Ok(id);
    }
    let created = client
        .create_label(google_gmail1::api::Label {
            name: Some(name.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        })
        .await?;
    Ok(created.id.unwrap_or_default())
}

async fn handler_trash_sender(
    State(state): State<ServerState>,
    Json(req): Json<SenderRequest>,
) -> AppJsonResult<Value> {
    let filter = EmailFilter {
        sender: Some(req.sender.clone()),
        ..Default::default()
    };
    let ids = state.store.get_all_ids(Some(&filter)).await?;

    if !req.confirm {
        return Ok(Json(json!({
            "preview": true,
            "sender": req.sender,
            "would_trash": ids.len(),
        })));
    }

    tracing::info!("Trashing {} messages from '{}'", ids.len(), req.sender);
    let client = state.gmail_client().await?;
    for id in &ids {
        client.trash_message(id).await?;
    }
    state.store.delete_emails(&ids).await?;
    state.store.delete_expenses_for_emails(&ids).await?;
    Ok(Json(json!({ "trashed": ids.len(), "sender": req.sender })))
}
