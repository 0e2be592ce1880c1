use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

use crate::auth::SESSION_COOKIE;
use crate::error::{AppError, AppJsonResult};
use crate::gmail::auth::{GmailAuth, StoredToken, SCOPES};
use crate::gmail::client::GmailClient;
use crate::server_config::cfg;
use crate::user_files;
use crate::ServerState;

const ALLOWLIST_FILE: &str = "dashboard_allowlist.json";
const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/login", get(handler_login_url))
        .route("/callback", get(handler_callback))
        .route("/logout", post(handler_logout))
        .route("/me", get(handler_me))
}

async fn handler_login_url(State(state): State<ServerState>) -> AppJsonResult<Value> {
    let req = state
        .http_client
        .get(GOOGLE_AUTH_URI)
        .query(&[
            ("client_id", cfg.dashboard.google_client_id.as_str()),
            ("redirect_uri", cfg.dashboard.google_redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPES.join(" ").as_str()),
            ("access_type", "offline"),
            ("prompt", "consent select_account"),
        ])
        .build()?;

    Ok(Json(json!({ "url": req.url().to_string() })))
}

#[derive(Deserialize, Debug)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

async fn handler_callback(
    State(state): State<ServerState>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> AppJsonResult<Value> {
    if let Some(error) = query.error {
        return Err(AppError::Unauthorized(error));
    }
    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest("Missing code".to_string()))?;

    let resp = state
        .http_client
        .post(GOOGLE_TOKEN_URI)
        .form(&[
            ("client_id", cfg.dashboard.google_client_id.as_str()),
            ("client_secret", cfg.dashboard.google_client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", cfg.dashboard.google_redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    let resp: Value = resp.json().await?;
    let token: TokenResponse = serde_json::from_value(resp.clone()).map_err(|_| {
        tracing::error!("Failed to parse token response: {:?}", resp);
        AppError::Unauthorized(resp.to_string())
    })?;

    let client = GmailClient::new(state.http_client.clone(), token.access_token.clone());
    let profile = client.get_profile().await?;
    let email = profile
        .email_address
        .ok_or_else(|| AppError::Unauthorized("Profile has no email address".to_string()))?;

    check_allowlist(&email)?;

    let expiry = token
        .expires_in
        .map(|secs| (chrono::Utc::now() + chrono::Duration::seconds(secs)).to_rfc3339());
    let auth = GmailAuth::new(state.http_client.clone());
    auth.save(&StoredToken {
        token: token.access_token,
        refresh_token: token.refresh_token.clone(),
        token_uri: GOOGLE_TOKEN_URI.to_string(),
        client_id: cfg.dashboard.google_client_id.clone(),
        client_secret: cfg.dashboard.google_client_secret.clone(),
        scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        expiry,
    })?;

    let session_id = state.session_store.create_session(email.clone());
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(cfg.dashboard.https_only);
    cookies.add(cookie);

    // a login that yielded a refresh token can resume incremental sync
    if token.refresh_token.is_some() {
        state.coordinator.on_login(state.clone());
    }

    tracing::info!("Login success for {}", email);
    Ok(Json(json!({ "message": "Login success", "email": email })))
}

/// The dashboard is single-user: the first OAuth login pins the allowed
/// account unless `DASHBOARD_ALLOWED_EMAIL` already did.
fn check_allowlist(email: &str) -> Result<(), AppError> {
    if !cfg.dashboard.allowed_email.is_empty() {
        if cfg.dashboard.allowed_email != email {
            return Err(AppError::Unauthorized(format!(
                "Account {email} is not allowed"
            )));
        }
        return Ok(());
    }

    #[derive(serde::Serialize, Deserialize, Default)]
    struct Allowlist {
        email: String,
    }

    let allowlist: Allowlist = user_files::read_json_or_default(ALLOWLIST_FILE);
    if allowlist.email.is_empty() {
        user_files::write_json(
            ALLOWLIST_FILE,
            &Allowlist {
                email: email.to_string(),
            },
        )?;
        return Ok(());
    }
    if allowlist.email != email {
        return Err(AppError::Unauthorized(format!(
            "Account {email} is not allowed"
        )));
    }
    Ok(())
}

async fn handler_logout(
    State(state): State<ServerState>,
    cookies: Cookies,
) -> AppJsonResult<Value> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        state.session_store.destroy_session(cookie.value());
        cookies.remove(Cookie::new(SESSION_COOKIE, ""));
    }
    Ok(Json(json!({ "message": "Logged out" })))
}

async fn handler_me(
    State(state): State<ServerState>,
    cookies: Cookies,
) -> AppJsonResult<Value> {
    if !cfg.dashboard.auth_enabled {
        return Ok(Json(json!({ "email": "disabled", "auth_enabled": false })));
    }
    let session = cookies
        .get(SESSION_COOKIE)
        .and_then(|c| state.session_store.load_session(c.value()));
    match session {
        Some(session) if session.expires_at > chrono::Utc::now().timestamp() => {
            Ok(Json(json!({ "email": session.email, "auth_enabled": true })))
        }
        _ => Err(AppError::Unauthorized("Not authenticated".to_string())),
    }
}
