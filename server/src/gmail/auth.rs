use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::server_config::cfg;

pub const SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/gmail.modify",
    "openid",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// `token.json` on disk; the layout matches what the OAuth callback writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<String>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl StoredToken {
    pub fn is_expired(&self) -> bool {
        match &self.expiry {
            Some(expiry) => match DateTime::parse_from_rfc3339(expiry) {
                Ok(dt) => dt.timestamp() <= Utc::now().timestamp(),
                Err(_) => true,
            },
            // no recorded expiry: assume the access token is stale
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Loads `token.json`, refreshes it through the Google token endpoint when
/// expired, and persists the rotated token for the next caller.
#[derive(Clone)]
pub struct GmailAuth {
    http_client: reqwest::Client,
    token_path: PathBuf,
}

impl GmailAuth {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            token_path: cfg.parser.token_path(),
        }
    }

    #[cfg(test)]
    pub fn with_token_path(http_client: reqwest::Client, token_path: PathBuf) -> Self {
        Self {
            http_client,
            token_path,
        }
    }

    pub fn token_exists(&self) -> bool {
        self.token_path.exists()
    }

    pub fn load(&self) -> AppResult<StoredToken> {
        let raw = fs::read_to_string(&self.token_path).map_err(|_| {
            AppError::Auth(format!(
                "Token file not found: {}. Log in first.",
                self.token_path.display()
            ))
        })?;
        let token = serde_json::from_str(&raw)
            .context("token.json is not valid")
            .map_err(|e| AppError::Auth(format!("{e:#}")))?;
        Ok(token)
    }

    pub fn save(&self, token: &StoredToken) -> AppResult<()> {
        if let Some(parent) = self.token_path.parent() {
            fs::create_dir_all(parent).context("Could not create token dir")?;
        }
        let raw = serde_json::to_string_pretty(token).context("Could not serialize token")?;
        fs::write(&self.token_path, raw).context("Could not write token.json")?;
        Ok(())
    }

    pub fn revoke(&self) -> AppResult<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path).context("Could not remove token.json")?;
        }
        Ok(())
    }

    /// A usable bearer token: the stored one while it lasts, otherwise a
    /// refreshed one (persisted before returning).
    pub async fn access_token(&self) -> AppResult<String> {
        let token = self.load()?;
        if !token.is_expired() {
            return Ok(token.token);
        }

        let Some(refresh_token) = token.refresh_token.clone() else {
            return Err(AppError::Auth(
                "Access token expired and no refresh token is stored".to_string(),
            ));
        };

        tracing::info!("Refreshing expired Gmail access token");
        let refreshed = self.refresh(&token, &refresh_token).await?;
        Ok(refreshed.token)
    }

    async fn refresh(&self, token: &StoredToken, refresh_token: &str) -> AppResult<StoredToken> {
        let (client_id, client_secret) = client_credentials(token);

        let resp = self
            .http_client
            .post(&token.token_uri)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            // surfaces invalid_grant so the auto-sync loop can disable itself
            return Err(AppError::Auth(format!("token refresh failed: {body}")));
        }

        let parsed: TokenEndpointResponse = resp.json().await?;
        let expiry = parsed
            .expires_in
            .map(|secs| (Utc::now() + Duration::seconds(secs)).to_rfc3339());

        let rotated = StoredToken {
            token: parsed.access_token,
            refresh_token: parsed
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expiry,
            ..token.clone()
        };
        self.save(&rotated)?;
        Ok(rotated)
    }
}

/// Client id/secret come from the dashboard settings when present, else from
/// whatever the token file recorded at login time.
fn client_credentials(token: &StoredToken) -> (String, String) {
    let id = if cfg.dashboard.google_client_id.is_empty() {
        token.client_id.clone()
    } else {
        cfg.dashboard.google_client_id.clone()
    };
    let secret = if cfg.dashboard.google_client_secret.is_empty() {
        token.client_secret.clone()
    } else {
        cfg.dashboard.google_client_secret.clone()
    };
    (id, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_check() {
        let mut token = StoredToken {
            token: "abc".to_string(),
            refresh_token: None,
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: vec![],
            expiry: None,
        };
        assert!(token.is_expired());

        token.expiry = Some((Utc::now() + Duration::hours(1)).to_rfc3339());
        assert!(!token.is_expired());

        token.expiry = Some((Utc::now() - Duration::hours(1)).to_rfc3339());
        assert!(token.is_expired());
    }

    #[test]
    fn test_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let auth = GmailAuth::with_token_path(
            reqwest::Client::new(),
            dir.path().join("token.json"),
        );
        assert!(!auth.token_exists());

        let token = StoredToken {
            token: "abc".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            expiry: None,
        };
        auth.save(&token).unwrap();
        let loaded = auth.load().unwrap();
        assert_eq!(loaded.token, "abc");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
    }
}
