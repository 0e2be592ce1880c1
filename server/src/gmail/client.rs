extern crate google_gmail1 as gmail1;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{anyhow, Context};
use google_gmail1::api::{
    History, Label, ListHistoryResponse, ListLabelsResponse, ListMessagesResponse,
    ListThreadsResponse, Message, MessagePartBody, Profile, Thread,
};
use leaky_bucket::RateLimiter;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::gmail::quota::{GMAIL_API_QUOTA, GMAIL_QUOTA_PER_SECOND};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

/// messages.get via the batch endpoint tops out around this chunk size
/// before Gmail starts shedding sub-requests.
const BATCH_CHUNK_SIZE: usize = 10;
const INTER_BATCH_DELAY: Duration = Duration::from_secs(2);
const MAX_BATCH_RETRIES: u32 = 7;

const DEFAULT_HISTORY_TYPES: [&str; 4] = [
    "messageAdded",
    "messageDeleted",
    "labelAdded",
    "labelRemoved",
];

pub struct GmailClient {
    http_client: reqwest::Client,
    access_token: String,
    rate_limiter: RateLimiter,
    base_url: String,
}

enum BatchOutcome {
    Ok(Box<Message>),
    RateLimited,
    Failed(u16),
}

impl GmailClient {
    pub fn new(http_client: reqwest::Client, access_token: String) -> GmailClient {
        let rate_limiter = RateLimiter::builder()
            .initial(GMAIL_QUOTA_PER_SECOND)
            .interval(Duration::from_secs(1))
            .refill(GMAIL_QUOTA_PER_SECOND)
            .build();

        GmailClient {
            http_client,
            access_token,
            rate_limiter,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, segments: &[&str]) -> String {
        format!("{}/gmail/v1/users/me/{}", self.base_url, segments.join("/"))
    }

    fn batch_url(&self) -> String {
        format!("{}/batch/gmail/v1", self.base_url)
    }

    async fn check_json<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 => AppError::Auth(body),
            404 => AppError::NotFound(body),
            429 => AppError::TooManyRequests,
            _ => AppError::Internal(anyhow!("Gmail API error ({status}): {body}")),
        })
    }

    // --- Messages ---

    pub async fn list_messages(
        &self,
        query: &str,
        label_ids: &[String],
        max_results: usize,
    ) -> AppResult<Vec<Message>> {
        let mut messages: Vec<Message> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            self.rate_limiter
                .acquire(GMAIL_API_QUOTA.messages_list)
                .await;

            let mut params = vec![
                ("q".to_string(), query.to_string()),
                (
                    "maxResults".to_string(),
                    max_results.min(500).to_string(),
                ),
            ];
            for label_id in label_ids {
                params.push(("labelIds".to_string(), label_id.clone()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }

            let resp = self
                .http_client
                .get(self.api_url(&["messages"]))
                .query(&params)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            let data: ListMessagesResponse = Self::check_json(resp).await?;

            messages.extend(data.messages.unwrap_or_default());
            page_token = data.next_page_token;
            if page_token.is_none() || messages.len() >= max_results {
                break;
            }
        }

        messages.truncate(max_results);
        Ok(messages)
    }

    pub async fn get_message(&self, message_id: &str, format: &str) -> AppResult<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get)
            .await;
        let resp = self
            .http_client
            .get(self.api_url(&["messages", message_id]))
            .query(&[("format", format)])
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    /// Fetch up to thousands of messages through the batch endpoint.
    ///
    /// Chunks of ten per batch call, 2 s between chunks of one pass. 429/403
    /// sub-responses are retried (that subset only) after
    /// `min(2^(attempt+1), 64) + U(0,2)` seconds, up to seven retry passes;
    /// other HTTP errors and anything still pending afterwards are returned
    /// as permanently-failed ids. Results come back in input order.
    pub async fn batch_get_messages(
        &self,
        message_ids: &[String],
        format: &str,
    ) -> AppResult<(Vec<Message>, Vec<String>)> {
        let mut results: HashMap<String, Message> = HashMap::new();
        let mut permanent_failures: HashSet<String> = HashSet::new();
        let mut pending: Vec<String> = message_ids.to_vec();

        for attempt in 0..=MAX_BATCH_RETRIES {
            if pending.is_empty() {
                break;
            }

            let mut rate_limited: Vec<String> = Vec::new();
            let chunk_count = pending.chunks(BATCH_CHUNK_SIZE).count();
            for (chunk_idx, chunk) in pending.chunks(BATCH_CHUNK_SIZE).enumerate() {
                for (mid, outcome) in self.execute_batch(chunk, format).await? {
                    match outcome {
                        BatchOutcome::Ok(message) => {
                            results.insert(mid, *message);
                        }
                        BatchOutcome::RateLimited => rate_limited.push(mid),
                        BatchOutcome::Failed(status) => {
                            tracing::warn!(
                                "Permanent batch error for {} (status={})",
                                mid,
                                status
                            );
                            permanent_failures.insert(mid);
                        }
                    }
                }
                if chunk_idx + 1 < chunk_count {
                    tokio::time::sleep(INTER_BATCH_DELAY).await;
                }
            }

            if rate_limited.is_empty() {
                pending.clear();
                break;
            }
            pending = rate_limited;

            if attempt == MAX_BATCH_RETRIES {
                break;
            }
            let backoff = (2u64.pow(attempt + 1)).min(64) as f64
                + rand::thread_rng().gen_range(0.0..2.0);
            tracing::info!(
                "{} messages rate-limited, retrying in {:.1}s (attempt {}/{})",
                pending.len(),
                backoff,
                attempt + 1,
                MAX_BATCH_RETRIES
            );
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
        }

        if !pending.is_empty() {
            tracing::warn!(
                "{} messages still rate-limited after {} retries",
                pending.len(),
                MAX_BATCH_RETRIES
            );
            permanent_failures.extend(pending);
        }

        let ok = message_ids
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();
        let failed = message_ids
            .iter()
            .filter(|id| permanent_failures.contains(*id))
            .cloned()
            .collect();
        Ok((ok, failed))
    }

    /// One multipart/mixed batch call; classifies each sub-response.
    async fn execute_batch(
        &self,
        chunk: &[String],
        format: &str,
    ) -> AppResult<Vec<(String, BatchOutcome)>> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get * chunk.len())
            .await;

        let boundary = format!("batch_{:016x}", rand::thread_rng().gen::<u64>());
        let mut body = String::new();
        for (i, mid) in chunk.iter().enumerate() {
            body.push_str(&format!(
                "--{boundary}\r\n\
                 Content-Type: application/http\r\n\
                 Content-ID: <item-{i}>\r\n\r\n\
                 GET /gmail/v1/users/me/messages/{mid}?format={format} HTTP/1.1\r\n\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        let resp = self
            .http_client
            .post(self.batch_url())
            .header(
                "Content-Type",
                format!("multipart/mixed; boundary={boundary}"),
            )
            .bearer_auth(&self.access_token)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => AppError::Auth(body),
                429 => AppError::TooManyRequests,
                _ => AppError::Internal(anyhow!("Batch request failed ({status}): {body}")),
            });
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = resp.text().await?;
        parse_batch_response(&content_type, &text, chunk)
    }

    // --- History ---

    pub async fn list_history(
        &self,
        start_history_id: &str,
        history_types: Option<&[&str]>,
    ) -> AppResult<Vec<History>> {
        let types = history_types.unwrap_or(&DEFAULT_HISTORY_TYPES);
        let mut records: Vec<History> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            self.rate_limiter
                .acquire(GMAIL_API_QUOTA.history_list)
                .await;

            let mut params = vec![(
                "startHistoryId".to_string(),
                start_history_id.to_string(),
            )];
            for t in types {
                params.push(("historyTypes".to_string(), t.to_string()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }

            let resp = self
                .http_client
                .get(self.api_url(&["history"]))
                .query(&params)
                .bearer_auth(&self.access_token)
                .send()
                .await?;

            // Gmail answers 404 when the cursor has aged out of the history
            let status = resp.status();
            if status.as_u16() == 404 {
                let body = resp.text().await.unwrap_or_default();
                return Err(AppError::Sync(format!(
                    "history id {start_history_id} is no longer available: {body}"
                )));
            }
            let data: ListHistoryResponse = Self::check_json(resp).await?;

            records.extend(data.history.unwrap_or_default());
            page_token = data.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(records)
    }

    // --- Modify / trash ---

    pub async fn modify_message(
        &self,
        message_id: &str,
        add_labels: &[String],
        remove_labels: &[String],
    ) -> AppResult<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_modify)
            .await;
        let resp = self
            .http_client
            .post(self.api_url(&["messages", message_id, "modify"]))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "addLabelIds": add_labels,
                "removeLabelIds": remove_labels
            }))
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn trash_message(&self, message_id: &str) -> AppResult<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_trash)
            .await;
        let resp = self
            .http_client
            .post(self.api_url(&["messages", message_id, "trash"]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn untrash_message(&self, message_id: &str) -> AppResult<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_trash)
            .await;
        let resp = self
            .http_client
            .post(self.api_url(&["messages", message_id, "untrash"]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    // --- Labels ---

    pub async fn list_labels(&self) -> AppResult<Vec<Label>> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.labels_list).await;
        let resp = self
            .http_client
            .get(self.api_url(&["labels"]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let data: ListLabelsResponse = Self::check_json(resp).await?;
        Ok(data.labels.unwrap_or_default())
    }

    pub async fn get_label(&self, label_id: &str) -> AppResult<Label> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.labels_get).await;
        let resp = self
            .http_client
            .get(self.api_url(&["labels", label_id]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn create_label(&self, label: Label) -> AppResult<Label> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.labels_create)
            .await;
        let resp = self
            .http_client
            .post(self.api_url(&["labels"]))
            .bearer_auth(&self.access_token)
            .json(&label)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn update_label(&self, label_id: &str, label: Label) -> AppResult<Label> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.labels_update)
            .await;
        let resp = self
            .http_client
            .put(self.api_url(&["labels", label_id]))
            .bearer_auth(&self.access_token)
            .json(&label)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn delete_label(&self, label_id: &str) -> AppResult<()> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.labels_delete)
            .await;
        let resp = self
            .http_client
            .delete(self.api_url(&["labels", label_id]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Internal(anyhow!("Error deleting label: {body}")));
        }
        Ok(())
    }

    // --- Threads ---

    pub async fn list_threads(&self, query: &str, max_results: usize) -> AppResult<Vec<Thread>> {
        let mut threads: Vec<Thread> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            self.rate_limiter
                .acquire(GMAIL_API_QUOTA.threads_list)
                .await;
            let mut params = vec![
                ("q".to_string(), query.to_string()),
                (
                    "maxResults".to_string(),
                    max_results.min(500).to_string(),
                ),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }
            let resp = self
                .http_client
                .get(self.api_url(&["threads"]))
                .query(&params)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            let data: ListThreadsResponse = Self::check_json(resp).await?;
            threads.extend(data.threads.unwrap_or_default());
            page_token = data.next_page_token;
            if page_token.is_none() || threads.len() >= max_results {
                break;
            }
        }

        threads.truncate(max_results);
        Ok(threads)
    }

    pub async fn get_thread(&self, thread_id: &str) -> AppResult<Thread> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.threads_get).await;
        let resp = self
            .http_client
            .get(self.api_url(&["threads", thread_id]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn modify_thread(
        &self,
        thread_id: &str,
        add_labels: &[String],
        remove_labels: &[String],
    ) -> AppResult<Thread> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.threads_modify)
            .await;
        let resp = self
            .http_client
            .post(self.api_url(&["threads", thread_id, "modify"]))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "addLabelIds": add_labels,
                "removeLabelIds": remove_labels
            }))
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn trash_thread(&self, thread_id: &str) -> AppResult<Thread> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.threads_trash)
            .await;
        let resp = self
            .http_client
            .post(self.api_url(&["threads", thread_id, "trash"]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    // --- Profile / attachments ---

    pub async fn get_profile(&self) -> AppResult<Profile> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.get_profile).await;
        let resp = self
            .http_client
            .get(self.api_url(&["profile"]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn get_history_id(&self) -> AppResult<String> {
        let profile = self.get_profile().await?;
        Ok(profile
            .history_id
            .map(|h| h.to_string())
            .unwrap_or_default())
    }

    pub async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> AppResult<MessagePartBody> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_attachments_get)
            .await;
        let resp = self
            .http_client
            .get(self.api_url(&["messages", message_id, "attachments", attachment_id]))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check_json(resp).await
    }

    pub async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> AppResult<Vec<u8>> {
        let body = self.get_attachment(message_id, attachment_id).await?;
        body.data
            .context("Attachment has no data")
            .map_err(AppError::from)
    }
}

/// Split a multipart/mixed batch response into per-id outcomes. Sub-responses
/// are correlated by the echoed `Content-ID` (`item-<idx>`), falling back to
/// segment order.
fn parse_batch_response(
    content_type: &str,
    body: &str,
    chunk: &[String],
) -> AppResult<Vec<(String, BatchOutcome)>> {
    static RE_BOUNDARY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"boundary="?([^";]+)"?"#).unwrap());
    static RE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"HTTP/[\d.]+\s+(\d{3})").unwrap());
    static RE_CONTENT_ID: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)content-id:[^\r\n]*item-(\d+)").unwrap());

    let boundary = RE_BOUNDARY
        .captures(content_type)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            AppError::Internal(anyhow!(
                "Batch response has no multipart boundary: {content_type}"
            ))
        })?;

    let mut outcomes = Vec::new();
    let mut fallback_idx = 0usize;
    for segment in body.split(&format!("--{boundary}")) {
        let segment = segment.trim_start_matches(['\r', '\n']);
        if segment.is_empty() || segment.starts_with("--") {
            continue;
        }
        let Some(status) = RE_STATUS
            .captures(segment)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
        else {
            continue;
        };

        let idx = RE_CONTENT_ID
            .captures(segment)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(fallback_idx);
        fallback_idx = idx + 1;
        let Some(mid) = chunk.get(idx) else { continue };

        let outcome = if (200..300).contains(&status) {
            let json_body = segment
                .find('{')
                .and_then(|start| segment.rfind('}').map(|end| &segment[start..=end]));
            match json_body.and_then(|j| serde_json::from_str::<Message>(j).ok()) {
                Some(message) => BatchOutcome::Ok(Box::new(message)),
                None => BatchOutcome::Failed(status),
            }
        } else if status == 429 || status == 403 {
            BatchOutcome::RateLimited
        } else {
            BatchOutcome::Failed(status)
        };
        outcomes.push((mid.clone(), outcome));
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn batch_part(idx: usize, status: u16, body: &str) -> String {
        format!(
            "--BATCH_BND\r\nContent-Type: application/http\r\nContent-ID: <response-item-{idx}>\r\n\r\n\
             HTTP/1.1 {status} X\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{body}\r\n"
        )
    }

    fn multipart_response(parts: Vec<String>) -> ResponseTemplate {
        let mut body = parts.join("");
        body.push_str("--BATCH_BND--\r\n");
        ResponseTemplate::new(200).set_body_raw(body, "multipart/mixed; boundary=BATCH_BND")
    }

    fn message_json(id: &str) -> String {
        format!(r#"{{"id": "{id}", "threadId": "t_{id}", "snippet": "hello"}}"#)
    }

    #[test]
    fn test_api_url() {
        let client = GmailClient::new(reqwest::Client::new(), "tok".to_string());
        assert_eq!(
            client.api_url(&["messages"]),
            "https://www.googleapis.com/gmail/v1/users/me/messages"
        );
        assert_eq!(
            client.api_url(&["messages", "123"]),
            "https://www.googleapis.com/gmail/v1/users/me/messages/123"
        );
        assert_eq!(
            client.batch_url(),
            "https://www.googleapis.com/batch/gmail/v1"
        );
    }

    #[test]
    fn test_parse_batch_response_classification() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let body = format!(
            "{}{}{}--BATCH_BND--\r\n",
            batch_part(0, 200, &message_json("a")),
            batch_part(1, 429, r#"{"error": {"code": 429}}"#),
            batch_part(2, 500, r#"{"error": {"code": 500}}"#),
        );
        let outcomes = parse_batch_response(
            "multipart/mixed; boundary=BATCH_BND",
            &body,
            &ids,
        )
        .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(&outcomes[0], (id, BatchOutcome::Ok(m)) if id == "a" && m.id.as_deref() == Some("a")));
        assert!(matches!(&outcomes[1], (id, BatchOutcome::RateLimited) if id == "b"));
        assert!(matches!(&outcomes[2], (id, BatchOutcome::Failed(500)) if id == "c"));
    }

    #[tokio::test]
    async fn test_batch_get_all_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .respond_with(multipart_response(vec![
                batch_part(0, 200, &message_json("a")),
                batch_part(1, 200, &message_json("b")),
            ]))
            .mount(&server)
            .await;

        let client = GmailClient::new(reqwest::Client::new(), "tok".to_string())
            .with_base_url(server.uri());
        let (ok, failed) = client
            .batch_get_messages(&["a".to_string(), "b".to_string()], "full")
            .await
            .unwrap();
        assert_eq!(ok.len(), 2);
        assert!(failed.is_empty());
        assert_eq!(ok[0].id.as_deref(), Some("a"));
        assert_eq!(ok[1].id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_batch_get_retries_rate_limited_subset() {
        let server = MockServer::start().await;
        // first pass: a and b rate-limited, c succeeds
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .respond_with(multipart_response(vec![
                batch_part(0, 429, r#"{"error": {"code": 429}}"#),
                batch_part(1, 403, r#"{"error": {"code": 403}}"#),
                batch_part(2, 200, &message_json("c")),
            ]))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // retry pass only carries a and b
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .respond_with(multipart_response(vec![
                batch_part(0, 200, &message_json("a")),
                batch_part(1, 200, &message_json("b")),
            ]))
            .mount(&server)
            .await;

        let client = GmailClient::new(reqwest::Client::new(), "tok".to_string())
            .with_base_url(server.uri());
        let started = Instant::now();
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (ok, failed) = client.batch_get_messages(&ids, "full").await.unwrap();

        assert_eq!(ok.len(), 3);
        assert!(failed.is_empty());
        // results in input order despite the retry
        let got: Vec<_> = ok.iter().filter_map(|m| m.id.clone()).collect();
        assert_eq!(got, ids);
        // first backoff pass sleeps at least 2 s
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_batch_get_permanent_failures_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .respond_with(multipart_response(vec![
                batch_part(0, 200, &message_json("a")),
                batch_part(1, 404, r#"{"error": {"code": 404}}"#),
            ]))
            .mount(&server)
            .await;

        let client = GmailClient::new(reqwest::Client::new(), "tok".to_string())
            .with_base_url(server.uri());
        let (ok, failed) = client
            .batch_get_messages(&["a".to_string(), "missing".to_string()], "full")
            .await
            .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(failed, vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn test_list_messages_paginates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(wiremock::matchers::query_param("pageToken", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m3", "threadId": "t3"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [
                    {"id": "m1", "threadId": "t1"},
                    {"id": "m2", "threadId": "t2"}
                ],
                "nextPageToken": "page2"
            })))
            .mount(&server)
            .await;

        let client = GmailClient::new(reqwest::Client::new(), "tok".to_string())
            .with_base_url(server.uri());
        let messages = client.list_messages("", &[], 10).await.unwrap();
        let ids: Vec<_> = messages.iter().filter_map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_history_gone_maps_to_sync_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/history"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GmailClient::new(reqwest::Client::new(), "tok".to_string())
            .with_base_url(server.uri());
        let err = client.list_history("12345", None).await.unwrap_err();
        assert!(matches!(err, AppError::Sync(_)));
    }
}
