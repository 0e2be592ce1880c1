pub mod session_store;

pub use session_store::AuthSessionStore;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tower_cookies::Cookies;

use crate::error::{AppError, AppResult};
use crate::server_config::cfg;
use crate::ServerState;

pub const SESSION_COOKIE: &str = "mailscope_session";

/// Session guard for every API route except `/api/auth/*`.
pub async fn require_auth(
    State(state): State<ServerState>,
    cookies: Cookies,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    if !cfg.dashboard.auth_enabled {
        return Ok(next.run(request).await);
    }

    let session_id = cookies
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    let session = state
        .session_store
        .load_session(&session_id)
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    if session.expires_at <= Utc::now().timestamp() {
        state.session_store.destroy_session(&session_id);
        return Err(AppError::Unauthorized("Session expired".to_string()));
    }

    Ok(next.run(request).await)
}
