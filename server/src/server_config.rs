use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use config::{Config, ConfigError};
use lazy_static::lazy_static;
use rand::RngCore;
use serde::Deserialize;

/// Settings for the mailbox ingestion pipeline, env-prefixed `EMAIL_PARSER_`.
#[derive(Debug, Clone, Deserialize)]
pub struct ParserSettings {
    pub chroma_persist_dir: String,
    pub google_credentials_path: String,
    pub google_token_path: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub sync_batch_size: usize,
}

impl ParserSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("chroma_persist_dir", "./email_data")?
            .set_default("google_credentials_path", "credentials.json")?
            .set_default("google_token_path", "token.json")?
            .set_default("embedding_model", "sentence-transformers/all-MiniLM-L6-v2")?
            .set_default("embedding_dimension", 384)?
            .set_default("sync_batch_size", 100)?
            .add_source(config::Environment::with_prefix("EMAIL_PARSER"))
            .build()?
            .try_deserialize()
    }

    pub fn persist_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.chroma_persist_dir).join(file_name)
    }

    /// The token file lives inside the persist dir unless an absolute path
    /// was configured.
    pub fn token_path(&self) -> PathBuf {
        let p = Path::new(&self.google_token_path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.persist_path(&self.google_token_path)
        }
    }
}

/// Settings for the HTTP service, env-prefixed `DASHBOARD_`.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSettings {
    pub auth_enabled: bool,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,
    pub allowed_email: String,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    pub https_only: bool,
    pub cors_origins: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_api_url: String,
}

impl DashboardSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("auth_enabled", true)?
            .set_default("google_client_id", "")?
            .set_default("google_client_secret", "")?
            .set_default("google_redirect_uri", "")?
            .set_default("allowed_email", "")?
            .set_default("session_secret", "")?
            .set_default("session_ttl_seconds", 86_400)?
            .set_default("https_only", false)?
            .set_default("cors_origins", "http://localhost:5173")?
            .set_default("llm_provider", "anthropic")?
            .set_default("llm_model", "claude-haiku-4-5-20251001")?
            .set_default("llm_api_key", "")?
            .set_default("llm_base_url", "http://localhost:11434")?
            .set_default("llm_api_url", "http://localhost:8001/run")?
            .add_source(config::Environment::with_prefix("DASHBOARD"))
            .build()?
            .try_deserialize()
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

pub struct ServerConfig {
    pub parser: ParserSettings,
    pub dashboard: DashboardSettings,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "persist_dir: {}, embedding_model: {} ({}d), sync_batch_size: {}, auth_enabled: {}",
            self.parser.chroma_persist_dir,
            self.parser.embedding_model,
            self.parser.embedding_dimension,
            self.parser.sync_batch_size,
            self.dashboard.auth_enabled,
        )
    }
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let parser = ParserSettings::from_env().expect("EMAIL_PARSER_* settings are invalid");
        let dashboard = DashboardSettings::from_env().expect("DASHBOARD_* settings are invalid");
        ServerConfig { parser, dashboard }
    };
}

/// Resolve the cookie-signing secret: configured value, then the persisted
/// secret file, then a freshly generated token written for next boot.
pub fn ensure_session_secret() -> anyhow::Result<String> {
    if !cfg.dashboard.session_secret.is_empty() {
        return Ok(cfg.dashboard.session_secret.clone());
    }

    let secret_file = cfg.parser.persist_path("dashboard_session_secret.txt");
    if let Some(parent) = secret_file.parent() {
        fs::create_dir_all(parent)?;
    }
    if secret_file.exists() {
        return Ok(fs::read_to_string(&secret_file)?.trim().to_string());
    }

    let mut raw = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut raw);
    let generated = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);
    fs::write(&secret_file, &generated)?;
    tracing::info!("Generated session secret at {}", secret_file.display());
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ParserSettings::from_env().unwrap();
        assert_eq!(settings.embedding_dimension, 384);
        assert_eq!(settings.sync_batch_size, 100);

        let dashboard = DashboardSettings::from_env().unwrap();
        assert_eq!(dashboard.session_ttl_seconds, 86_400);
        assert!(dashboard
            .cors_origin_list()
            .contains(&"http://localhost:5173".to_string()));
    }
}
