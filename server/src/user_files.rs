//! User-owned JSON documents under the persist dir. Read on demand, written
//! by full-file replace; last writer wins.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AppResult;
use crate::server_config::cfg;

pub fn path_for(file_name: &str) -> PathBuf {
    cfg.parser.persist_path(file_name)
}

pub fn read_json<T: DeserializeOwned>(file_name: &str) -> Option<T> {
    let path = path_for(file_name);
    let raw = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
            None
        }
    }
}

pub fn read_json_or_default<T: DeserializeOwned + Default>(file_name: &str) -> T {
    read_json(file_name).unwrap_or_default()
}

pub fn write_json<T: Serialize>(file_name: &str, value: &T) -> AppResult<()> {
    let path = path_for(file_name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(value).context("Could not serialize")?;
    fs::write(&path, raw).with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}
