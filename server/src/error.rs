use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    RequestTimeout,
    TooManyRequests,
    /// Missing/invalid credentials or a refused refresh token.
    Auth(String),
    /// Incremental sync requested without a cursor, or the history API is gone.
    Sync(String),
    /// Model load or encode failure, fatal to the sync run that hit it.
    Embedding(String),
    /// Enrichment endpoint failure; callers downgrade the chunk to heuristics.
    Llm(String),
    DbError(sea_orm::error::DbErr),
    Internal(anyhow::Error),
}

impl AppError {
    /// Refresh-token failures carry Google's "invalid_grant" marker; the
    /// auto-sync loop disables itself when it sees one.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, AppError::Auth(msg) if msg.contains("invalid_grant"))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            AppError::RequestTimeout => write!(f, "request timeout"),
            AppError::TooManyRequests => write!(f, "too many requests"),
            AppError::Auth(msg) => write!(f, "auth error: {msg}"),
            AppError::Sync(msg) => write!(f, "sync error: {msg}"),
            AppError::Embedding(msg) => write!(f, "embedding error: {msg}"),
            AppError::Llm(msg) => write!(f, "llm error: {msg}"),
            AppError::DbError(err) => write!(f, "store error: {err}"),
            AppError::Internal(err) => write!(f, "{err:#}"),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<sea_orm::error::DbErr> for AppError {
    fn from(error: sea_orm::error::DbErr) -> Self {
        AppError::DbError(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(reqwest::StatusCode::BAD_REQUEST) => AppError::BadRequest(error.to_string()),
            Some(reqwest::StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(reqwest::StatusCode::TOO_MANY_REQUESTS) => AppError::TooManyRequests,
            Some(reqwest::StatusCode::UNAUTHORIZED) => AppError::Auth(error.to_string()),
            _ => AppError::Internal(error.into()),
        }
    }
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {
                    "code": StatusCode::BAD_REQUEST.as_u16(),
                    "message": error
                }})),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": {
                    "code": StatusCode::NOT_FOUND.as_u16(),
                    "message": msg
                }})),
            ),
            AppError::Unauthorized(error) | AppError::Auth(error) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {
                    "code": StatusCode::UNAUTHORIZED.as_u16(),
                    "message": error
                }})),
            ),
            AppError::RequestTimeout => (
                StatusCode::REQUEST_TIMEOUT,
                Json(json!({"error": {
                    "code": StatusCode::REQUEST_TIMEOUT.as_u16(),
                    "message": "Request took too long"
                }})),
            ),
            AppError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": {
                    "code": StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    "message": "Too many requests"
                }})),
            ),
            AppError::Sync(msg) => (
                StatusCode::CONFLICT,
                Json(json!({"error": {
                    "code": StatusCode::CONFLICT.as_u16(),
                    "message": msg
                }})),
            ),
            AppError::Llm(msg) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": {
                    "code": StatusCode::BAD_GATEWAY.as_u16(),
                    "message": msg
                }})),
            ),
            AppError::Embedding(msg) => {
                tracing::error!("Embedding error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": {
                        "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                        "message": "Embedding error"
                    }})),
                )
            }
            AppError::DbError(err) => {
                tracing::error!("Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": {
                        "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                        "message": "Store error"
                    }})),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("error msg: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": {
                        "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                        "message": "Internal server error"
                    }})),
                )
            }
        };

        err.into_response()
    }
}
