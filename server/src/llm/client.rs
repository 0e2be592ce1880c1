use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::server_config::cfg;

/// The runner accepts at most this per-prompt ceiling.
const MAX_PROMPT_TIMEOUT_SECS: f64 = 590.0;

#[derive(Debug, Deserialize)]
struct RunnerResponse {
    stdout: String,
}

/// One prompt against the external LLM runner; returns its stdout. No
/// streaming: the response arrives whole or not at all.
pub async fn call_llm(
    http_client: &reqwest::Client,
    prompt: &str,
    timeout_secs: f64,
) -> AppResult<String> {
    let resp = http_client
        .post(&cfg.dashboard.llm_api_url)
        .json(&json!({
            "prompt": prompt,
            "timeout_seconds": timeout_secs.min(MAX_PROMPT_TIMEOUT_SECS),
        }))
        .timeout(Duration::from_secs_f64(timeout_secs + 10.0))
        .send()
        .await
        .map_err(|e| AppError::Llm(format!("LLM call failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Llm(format!("LLM runner error ({status}): {body}")));
    }

    let parsed: RunnerResponse = resp
        .json()
        .await
        .map_err(|e| AppError::Llm(format!("LLM response was not JSON: {e}")))?;
    Ok(parsed.stdout)
}
