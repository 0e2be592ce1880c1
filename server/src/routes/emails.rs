use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppJsonResult, AppResult};
use crate::gmail::parse::extract_attachments;
use crate::store::EmailFilter;
use crate::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler_list))
        .route("/:gmail_id", get(handler_get))
        .route("/:gmail_id/attachments", get(handler_attachments))
        .route(
            "/:gmail_id/attachments/:attachment_id/download",
            get(handler_download),
        )
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    sender: Option<String>,
    label: Option<String>,
    category: Option<String>,
    unread: Option<bool>,
    starred: Option<bool>,
    search: Option<String>,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    50
}

fn default_mode() -> String {
    "hybrid".to_string()
}

async fn handler_list(
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> AppJsonResult<Value> {
    let limit = query.limit.min(200);
    let search = state.search();

    if let Some(q) = query.search.filter(|q| !q.is_empty()) {
        let hits = match query.mode.as_str() {
            "semantic" => search.semantic_search(&q, limit, None).await?,
            "fulltext" => search.fulltext_search(&q, limit).await?,
            _ => search.hybrid_search(&q, limit).await?,
        };
        return Ok(Json(json!({ "emails": hits, "page": 1, "limit": limit })));
    }

    let filter = EmailFilter {
        sender_contains: query.sender,
        label: query.label,
        category: query.category,
        is_read: query.unread.map(|u| !u),
        is_starred: query.starred,
        ..Default::default()
    };
    let page = query.page.max(1);
    let emails = search
        .filter_emails(&filter, limit, (page - 1) * limit)
        .await?;
    Ok(Json(json!({ "emails": emails, "page": page, "limit": limit })))
}

async fn handler_get(
    State(state): State<ServerState>,
    Path(gmail_id): Path<String>,
) -> AppJsonResult<Value> {
    let email = state
        .store
        .get_email(&gmail_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Email not found".to_string()))?;
    Ok(Json(json!(email)))
}

async fn handler_attachments(
    State(state): State<ServerState>,
    Path(gmail_id): Path<String>,
) -> AppJsonResult<Value> {
    let client = state.gmail_client().await?;
    let message = client.get_message(&gmail_id, "full").await?;
    let attachments = message
        .payload
        .as_ref()
        .map(extract_attachments)
        .unwrap_or_default();
    Ok(Json(json!({ "attachments": attachments })))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default = "default_filename")]
    filename: String,
    #[serde(default = "default_mime")]
    mime_type: String,
}

fn default_filename() -> String {
    "attachment".to_string()
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

async fn handler_download(
    State(state): State<ServerState>,
    Path((gmail_id, attachment_id)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let client = state.gmail_client().await?;
    let data = client.download_attachment(&gmail_id, &attachment_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, query.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", query.filename),
            ),
        ],
        data,
    )
        .into_response())
}
