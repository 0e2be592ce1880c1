use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use google_gmail1::api::{History, Message};
use serde::Serialize;

use crate::categorizer::{Categorizer, EmailSignals};
use crate::embeddings::{prepare_email_text, Embedder, ENCODE_BATCH_SIZE};
use crate::error::{AppError, AppResult};
use crate::gmail::client::GmailClient;
use crate::gmail::parse::{parse_message, ParsedEmail};
use crate::llm::extractor::{self, EnrichmentInput};
use crate::server_config::cfg;
use crate::store::{to_blob, EmailFilter, EmailPatch, EmailStore};
use entity::{email, label, sync_state};

pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

const FALLBACK_SYNC_DAYS: i64 = 7;

#[derive(Debug, Clone, Default)]
pub struct FullSyncOptions {
    pub query: String,
    pub max_emails: usize,
    pub label_ids: Vec<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub newer_than: Option<String>,
    pub older_than: Option<String>,
    pub days_ago: Option<i64>,
}

impl FullSyncOptions {
    pub fn last_days(days: i64) -> Self {
        Self {
            max_emails: 100_000,
            days_ago: Some(days),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IncrementalSummary {
    pub added: usize,
    pub deleted: usize,
    pub refreshed: usize,
    pub fallback: bool,
}

/// Compose the Gmail search query from the user query plus the date-range
/// selectors, epoch-second `after:`/`before:` form.
pub fn build_time_query(
    query: &str,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    newer_than: Option<&str>,
    older_than: Option<&str>,
    days_ago: Option<i64>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !query.is_empty() {
        parts.push(query.to_string());
    }
    let after = match days_ago {
        Some(days) => Some(Utc::now() - Duration::days(days)),
        None => after,
    };
    if let Some(after) = after {
        parts.push(format!("after:{}", after.timestamp()));
    }
    if let Some(before) = before {
        parts.push(format!("before:{}", before.timestamp()));
    }
    if let Some(newer_than) = newer_than {
        parts.push(format!("newer_than:{newer_than}"));
    }
    if let Some(older_than) = older_than {
        parts.push(format!("older_than:{older_than}"));
    }
    parts.join(" ")
}

/// `|A|B|` encoding so `|X|` is an exact-label substring test; empty label
/// sets encode as the empty string, never `"||"`.
pub fn pipe_wrap_labels(names: &[String]) -> String {
    if names.is_empty() {
        String::new()
    } else {
        format!("|{}|", names.join("|"))
    }
}

/// Drives full and incremental synchronization between Gmail and the local
/// store, then hands the fresh rows to the enrichment stage.
pub struct IngestionPipeline {
    client: GmailClient,
    store: EmailStore,
    embedder: Arc<dyn Embedder>,
    http_client: reqwest::Client,
}

impl IngestionPipeline {
    pub fn new(
        client: GmailClient,
        store: EmailStore,
        embedder: Arc<dyn Embedder>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            client,
            store,
            embedder,
            http_client,
        }
    }

    /// Refresh the label catalog; label ids resolve to display names when
    /// building the pipe-bracketed labels string.
    pub async fn sync_labels(&self) -> AppResult<usize> {
        tracing::info!("Syncing labels");
        let raw_labels = self.client.list_labels().await?;
        let count = raw_labels.len();
        for stub in raw_labels {
            let Some(id) = stub.id else { continue };
            let detail = self.client.get_label(&id).await?;
            let color = detail.color.unwrap_or_default();
            self.store
                .upsert_label(label::Model {
                    id,
                    name: detail.name.unwrap_or_default(),
                    label_type: detail.type_.unwrap_or_default(),
                    message_list_visibility: detail.message_list_visibility.unwrap_or_default(),
                    label_list_visibility: detail.label_list_visibility.unwrap_or_default(),
                    text_color: color.text_color.unwrap_or_default(),
                    background_color: color.background_color.unwrap_or_default(),
                })
                .await?;
        }
        tracing::info!("Synced {} labels", count);
        Ok(count)
    }

    async fn label_map(&self) -> AppResult<HashMap<String, String>> {
        Ok(self
            .store
            .get_labels()
            .await?
            .into_iter()
            .map(|l| (l.id, l.name))
            .collect())
    }

    pub fn full_sync<'a>(
        &'a self,
        options: &'a FullSyncOptions,
        progress: Option<ProgressFn<'a>>,
    ) -> Pin<Box<dyn Future<Output = AppResult<usize>> + Send + 'a>> {
        Box::pin(self.full_sync_inner(options, progress))
    }

    async fn full_sync_inner(
        &self,
        options: &FullSyncOptions,
        progress: Option<ProgressFn<'_>>,
    ) -> AppResult<usize> {
        let time_query = build_time_query(
            &options.query,
            options.after,
            options.before,
            options.newer_than.as_deref(),
            options.older_than.as_deref(),
            options.days_ago,
        );
        let effective_query = if time_query.is_empty() {
            "-in:trash -in:spam".to_string()
        } else {
            format!("-in:trash -in:spam {time_query}")
        };
        let max_emails = if options.max_emails == 0 {
            100_000
        } else {
            options.max_emails
        };
        tracing::info!(
            "Starting full sync (max={}, query='{}')",
            max_emails,
            effective_query
        );

        let stubs = self
            .client
            .list_messages(&effective_query, &options.label_ids, max_emails)
            .await?;
        let stub_ids: Vec<String> = stubs.into_iter().filter_map(|m| m.id).collect();
        let total = stub_ids.len();
        tracing::info!("Found {} messages to sync", total);

        self.sync_labels().await?;
        let label_map = self.label_map().await?;
        let batch_size = cfg.parser.sync_batch_size.max(1);

        let mut total_synced = 0usize;
        let mut already_stored = 0usize;
        let mut failed_total = 0usize;

        for (chunk_idx, chunk) in stub_ids.chunks(batch_size).enumerate() {
            let existing = self.store.get_existing_ids(chunk).await?;
            already_stored += existing.len();
            let new_ids: Vec<String> = chunk
                .iter()
                .filter(|id| !existing.contains(*id))
                .cloned()
                .collect();

            if !new_ids.is_empty() {
                let (messages, failed) = self.client.batch_get_messages(&new_ids, "full").await?;
                failed_total += failed.len();

                let (rows, inputs) = self.build_rows(&messages, &label_map).await?;
                self.store.upsert_emails_batch(rows).await?;
                total_synced += inputs.len();
                self.enrich(&inputs).await?;
            }

            if let Some(progress) = progress {
                let synced = ((chunk_idx + 1) * batch_size + already_stored).min(total);
                progress(synced, total);
            }
            tracing::info!(
                "Synced batch {}-{}",
                chunk_idx * batch_size,
                chunk_idx * batch_size + chunk.len()
            );
        }

        if failed_total > 0 {
            tracing::warn!("{} messages permanently failed to fetch", failed_total);
        }

        // deletion reconciliation: anything local in the date range that the
        // remote listing no longer returned is gone upstream
        let date_filter = EmailFilter {
            date_from: options
                .days_ago
                .map(|d| (Utc::now() - Duration::days(d)).timestamp())
                .or(options.after.map(|dt| dt.timestamp())),
            date_to: options.before.map(|dt| dt.timestamp()),
            ..Default::default()
        };
        let local_ids = self
            .store
            .get_all_ids(if date_filter.is_empty() {
                None
            } else {
                Some(&date_filter)
            })
            .await?;
        let remote: HashSet<&String> = stub_ids.iter().collect();
        let deleted: Vec<String> = local_ids
            .into_iter()
            .filter(|id| !remote.contains(id))
            .collect();
        if !deleted.is_empty() {
            tracing::info!("Deletion reconciliation removing {} emails", deleted.len());
            self.store.delete_emails(&deleted).await?;
            self.store.delete_expenses_for_emails(&deleted).await?;
        }

        self.finish_sync_state(total_synced as i64).await?;
        tracing::info!("Full sync complete: {} emails", total_synced);
        Ok(total_synced)
    }

    pub fn incremental_sync<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = AppResult<IncrementalSummary>> + Send + 'a>> {
        Box::pin(self.incremental_sync_inner())
    }

    async fn incremental_sync_inner(&self) -> AppResult<IncrementalSummary> {
        let state = self.store.get_sync_state().await?;
        let last_history_id = state
            .map(|s| s.last_history_id)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                AppError::Sync("No previous sync state found. Run a full sync first.".to_string())
            })?;

        tracing::info!("Incremental sync from history_id={}", last_history_id);
        let history = match self.client.list_history(&last_history_id, None).await {
            Ok(history) => history,
            Err(e) => {
                // the cursor aged out (Gmail answers 404); resync the recent window
                tracing::warn!("History API failed ({}), falling back to full sync", e);
                let added = self
                    .full_sync(&FullSyncOptions::last_days(FALLBACK_SYNC_DAYS), None)
                    .await?;
                return Ok(IncrementalSummary {
                    added,
                    fallback: true,
                    ..Default::default()
                });
            }
        };

        let mut added: HashSet<String> = HashSet::new();
        let mut deleted: HashSet<String> = HashSet::new();
        let mut label_changed: HashSet<String> = HashSet::new();
        for record in &history {
            collect_history_ids(record, &mut added, &mut deleted, &mut label_changed);
        }

        // deletion pass
        let to_delete: Vec<String> = deleted.difference(&added).cloned().collect();
        if !to_delete.is_empty() {
            self.store.delete_emails(&to_delete).await?;
            self.store.delete_expenses_for_emails(&to_delete).await?;
        }

        // metadata refresh pass
        let to_refresh: Vec<String> = label_changed
            .iter()
            .filter(|id| !added.contains(*id) && !deleted.contains(*id))
            .cloned()
            .collect();
        let refreshed = self.refresh_metadata(&to_refresh).await?;

        // add pass
        let to_add: Vec<String> = added.into_iter().collect();
        let mut added_count = 0usize;
        if !to_add.is_empty() {
            let label_map = self.label_map().await?;
            let (messages, _failed) = self.client.batch_get_messages(&to_add, "full").await?;
            let (rows, inputs) = self.build_rows(&messages, &label_map).await?;
            self.store.upsert_emails_batch(rows).await?;
            added_count = inputs.len();
            self.enrich(&inputs).await?;
        }

        self.finish_sync_state(added_count as i64).await?;
        let summary = IncrementalSummary {
            added: added_count,
            deleted: to_delete.len(),
            refreshed,
            fallback: false,
        };
        tracing::info!(
            "Incremental sync complete: +{} new, -{} deleted, {} refreshed",
            summary.added,
            summary.deleted,
            summary.refreshed
        );
        Ok(summary)
    }

    /// Metadata-format refetch for label-changed messages. TRASH/SPAM means
    /// the message left the mailbox; everything else shallow-merges.
    async fn refresh_metadata(&self, ids: &[String]) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let label_map = self.label_map().await?;
        let (messages, _failed) = self.client.batch_get_messages(ids, "metadata").await?;

        let mut patches = Vec::new();
        let mut trashed: Vec<String> = Vec::new();
        for message in &messages {
            let Some(id) = message.id.clone() else { continue };
            let label_ids = message.label_ids.clone().unwrap_or_default();
            if label_ids.iter().any(|l| l == "TRASH" || l == "SPAM") {
                trashed.push(id);
                continue;
            }
            let names: Vec<String> = label_ids
                .iter()
                .map(|lid| label_map.get(lid).cloned().unwrap_or_else(|| lid.clone()))
                .collect();
            patches.push((
                id,
                EmailPatch {
                    labels: Some(pipe_wrap_labels(&names)),
                    is_read: Some(!label_ids.iter().any(|l| l == "UNREAD")),
                    is_starred: Some(label_ids.iter().any(|l| l == "STARRED")),
                    history_id: Some(
                        message
                            .history_id
                            .map(|h| h.to_string())
                            .unwrap_or_default(),
                    ),
                    ..Default::default()
                },
            ));
        }

        let refreshed = patches.len();
        self.store.update_emails_batch(patches).await?;
        if !trashed.is_empty() {
            self.store.delete_emails(&trashed).await?;
            self.store.delete_expenses_for_emails(&trashed).await?;
        }
        Ok(refreshed)
    }

    /// Re-encode every stored document with the current model and upsert the
    /// vectors. Used when the embedding model changes.
    pub async fn reindex_embeddings(&self, batch_size: usize) -> AppResult<usize> {
        tracing::info!("Reindexing all embeddings");
        let emails = self.store.get_all_emails().await?;
        let texts: Vec<String> = emails
            .iter()
            .map(|e| prepare_email_text(&e.subject, &e.document, &e.sender))
            .collect();

        let embedder = self.embedder.clone();
        let vectors = tokio::task::spawn_blocking(move || {
            embedder.encode_batch(&texts, batch_size.max(1))
        })
        .await
        .context("embedding task panicked")??;

        let rows: Vec<email::Model> = emails
            .iter()
            .zip(&vectors)
            .map(|(e, v)| stored_to_model(e, Some(to_blob(v))))
            .collect();
        let count = rows.len();
        self.store.upsert_emails_batch(rows).await?;
        tracing::info!("Reindexed {} emails", count);
        Ok(count)
    }

    /// Enrich every stored email that the LLM stage has not yet covered
    /// (all of them when `force`). Returns how many were processed.
    pub fn llm_process<'a>(
        &'a self,
        force: bool,
        progress: Option<ProgressFn<'a>>,
    ) -> Pin<Box<dyn Future<Output = AppResult<usize>> + Send + 'a>> {
        Box::pin(self.llm_process_inner(force, progress))
    }

    async fn llm_process_inner(
        &self,
        force: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> AppResult<usize> {
        let emails = self.store.get_all_emails().await?;
        let inputs: Vec<EnrichmentInput> = emails
            .iter()
            .filter(|e| force || !e.actions_extracted)
            .map(EnrichmentInput::from_stored)
            .collect();
        if inputs.is_empty() {
            return Ok(0);
        }
        self.enrich_with_progress(&inputs, progress).await?;
        Ok(inputs.len())
    }

    async fn enrich(&self, inputs: &[EnrichmentInput]) -> AppResult<()> {
        self.enrich_with_progress(inputs, None).await
    }

    async fn enrich_with_progress(
        &self,
        inputs: &[EnrichmentInput],
        progress: Option<ProgressFn<'_>>,
    ) -> AppResult<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let categorizer = Categorizer::load();
        let results =
            extractor::extract_batch(&self.http_client, &categorizer, inputs, progress).await;
        extractor::apply_enrichment(&self.store, inputs, &results).await
    }

    /// Parse, classify and embed a fetched batch; returns the rows to upsert
    /// plus the enrichment inputs for the same messages.
    async fn build_rows(
        &self,
        messages: &[Message],
        label_map: &HashMap<String, String>,
    ) -> AppResult<(Vec<email::Model>, Vec<EnrichmentInput>)> {
        let categorizer = Categorizer::load();
        let parsed: Vec<ParsedEmail> = messages.iter().map(parse_message).collect();

        let texts: Vec<String> = parsed
            .iter()
            .map(|p| prepare_email_text(&p.subject, &p.body_text, &p.sender))
            .collect();
        let embedder = self.embedder.clone();
        let vectors = tokio::task::spawn_blocking(move || {
            embedder.encode_batch(&texts, ENCODE_BATCH_SIZE)
        })
        .await
        .context("embedding task panicked")??;

        let mut rows = Vec::with_capacity(parsed.len());
        let mut inputs = Vec::with_capacity(parsed.len());
        for (p, vector) in parsed.iter().zip(vectors) {
            let names: Vec<String> = p
                .label_ids
                .iter()
                .map(|lid| label_map.get(lid).cloned().unwrap_or_else(|| lid.clone()))
                .collect();
            let labels = pipe_wrap_labels(&names);
            let category = categorizer.categorize(EmailSignals {
                sender: &p.sender,
                subject: &p.subject,
                labels: &labels,
                list_unsubscribe: &p.list_unsubscribe,
            });
            let (date_iso, date_timestamp) = match &p.date {
                Some(date) => (date.to_rfc3339(), date.timestamp()),
                None => (String::new(), 0),
            };

            inputs.push(EnrichmentInput {
                id: p.gmail_id.clone(),
                subject: p.subject.clone(),
                sender: p.sender.clone(),
                snippet: p.snippet.clone(),
                labels: labels.clone(),
                list_unsubscribe: p.list_unsubscribe.clone(),
                thread_id: p.thread_id.clone(),
                date_iso: date_iso.clone(),
                date_timestamp,
            });
            rows.push(email::Model {
                id: p.gmail_id.clone(),
                thread_id: p.thread_id.clone(),
                subject: p.subject.clone(),
                sender: p.sender.clone(),
                recipients_to: p.recipients_to.clone(),
                recipients_cc: p.recipients_cc.clone(),
                recipients_bcc: p.recipients_bcc.clone(),
                date_iso,
                date_timestamp,
                snippet: p.snippet.clone(),
                is_read: p.is_read,
                is_starred: p.is_starred,
                is_draft: p.is_draft,
                has_attachments: p.has_attachments,
                labels,
                history_id: p.history_id.clone(),
                size_estimate: p.size_estimate,
                list_unsubscribe: p.list_unsubscribe.clone(),
                category,
                document: p.body_text.clone(),
                embedding: Some(to_blob(&vector)),
                actions_extracted: false,
                action_items_json: "[]".to_string(),
                has_action_items: false,
                spending_json: "{}".to_string(),
                has_transactions: false,
                llm_categorized: false,
            });
        }
        Ok((rows, inputs))
    }

    /// Record the remote cursor (best effort) and bump the accumulated
    /// counter. A failed history-id fetch keeps the previous cursor.
    async fn finish_sync_state(&self, newly_synced: i64) -> AppResult<()> {
        let previous = self.store.get_sync_state().await?;
        let last_history_id = match self.client.get_history_id().await {
            Ok(history_id) => history_id,
            Err(e) => {
                tracing::warn!("Could not fetch profile history id: {}", e);
                previous
                    .as_ref()
                    .map(|s| s.last_history_id.clone())
                    .unwrap_or_default()
            }
        };
        let total = previous.map(|s| s.total_emails_synced).unwrap_or(0) + newly_synced;
        self.store
            .update_sync_state(sync_state::Model {
                id: "state".to_string(),
                last_history_id,
                last_full_sync: Utc::now().to_rfc3339(),
                total_emails_synced: total,
            })
            .await
    }
}

fn collect_history_ids(
    record: &History,
    added: &mut HashSet<String>,
    deleted: &mut HashSet<String>,
    label_changed: &mut HashSet<String>,
) {
    if let Some(items) = &record.messages_added {
        for item in items {
            if let Some(id) = item.message.as_ref().and_then(|m| m.id.clone()) {
                added.insert(id);
            }
        }
    }
    if let Some(items) = &record.messages_deleted {
        for item in items {
            if let Some(id) = item.message.as_ref().and_then(|m| m.id.clone()) {
                deleted.insert(id);
            }
        }
    }
    if let Some(items) = &record.labels_added {
        for item in items {
            if let Some(id) = item.message.as_ref().and_then(|m| m.id.clone()) {
                label_changed.insert(id);
            }
        }
    }
    if let Some(items) = &record.labels_removed {
        for item in items {
            if let Some(id) = item.message.as_ref().and_then(|m| m.id.clone()) {
                label_changed.insert(id);
            }
        }
    }
}

fn stored_to_model(e: &crate::store::StoredEmail, embedding: Option<Vec<u8>>) -> email::Model {
    email::Model {
        id: e.id.clone(),
        thread_id: e.thread_id.clone(),
        subject: e.subject.clone(),
        sender: e.sender.clone(),
        recipients_to: e.recipients_to.clone(),
        recipients_cc: e.recipients_cc.clone(),
        recipients_bcc: e.recipients_bcc.clone(),
        date_iso: e.date_iso.clone(),
        date_timestamp: e.date_timestamp,
        snippet: e.snippet.clone(),
        is_read: e.is_read,
        is_starred: e.is_starred,
        is_draft: e.is_draft,
        has_attachments: e.has_attachments,
        labels: e.labels.clone(),
        history_id: e.history_id.clone(),
        size_estimate: e.size_estimate,
        list_unsubscribe: e.list_unsubscribe.clone(),
        category: e.category.clone(),
        document: e.document.clone(),
        embedding,
        actions_extracted: e.actions_extracted,
        action_items_json: e.action_items_json.clone(),
        has_action_items: e.has_action_items,
        spending_json: e.spending_json.clone(),
        has_transactions: e.has_transactions,
        llm_categorized: e.llm_categorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_core;
    use crate::embeddings::testing::StubEmbedder;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_time_query_days_ago() {
        let q = build_time_query("from:alice@example.com", None, None, None, None, Some(60));
        assert!(q.starts_with("from:alice@example.com "));
        let expected = (Utc::now() - Duration::days(60)).timestamp();
        let after: i64 = q.split("after:").nth(1).unwrap().parse().unwrap();
        assert!((after - expected).abs() <= 2);
    }

    #[test]
    fn test_build_time_query_bounds() {
        let after = Utc::now() - Duration::days(30);
        let before = Utc::now();
        let q = build_time_query("", Some(after), Some(before), None, None, None);
        assert_eq!(
            q,
            format!("after:{} before:{}", after.timestamp(), before.timestamp())
        );

        let q = build_time_query("", None, None, Some("7d"), Some("1y"), None);
        assert_eq!(q, "newer_than:7d older_than:1y");
    }

    #[test]
    fn test_pipe_wrap_round_trip() {
        assert_eq!(pipe_wrap_labels(&[]), "");
        let names = vec!["INBOX".to_string(), "Jobs".to_string()];
        let wrapped = pipe_wrap_labels(&names);
        assert_eq!(wrapped, "|INBOX|Jobs|");
        assert!(wrapped.starts_with('|') && wrapped.ends_with('|'));
        let back: Vec<&str> = wrapped
            .trim_matches('|')
            .split('|')
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(back, vec!["INBOX", "Jobs"]);
    }

    async fn mock_gmail(server: &MockServer, stub_ids: &[&str]) {
        let stubs: Vec<serde_json::Value> = stub_ids
            .iter()
            .map(|id| serde_json::json!({"id": id, "threadId": format!("t_{id}")}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "messages": stubs })),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "labels": [{"id": "INBOX", "name": "INBOX", "type": "system"}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels/INBOX"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": "INBOX", "name": "INBOX", "type": "system"}),
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"emailAddress": "me@example.com", "historyId": "9999"}),
            ))
            .mount(server)
            .await;

        let parts: Vec<String> = stub_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let message = serde_json::json!({
                    "id": id,
                    "threadId": format!("t_{id}"),
                    "labelIds": ["INBOX", "UNREAD"],
                    "snippet": format!("snippet {id}"),
                    "historyId": "100",
                    "sizeEstimate": 512,
                    "payload": {
                        "mimeType": "text/plain",
                        "headers": [
                            {"name": "From", "value": "sender@example.com"},
                            {"name": "To", "value": "me@example.com"},
                            {"name": "Subject", "value": format!("Subject {id}")},
                            {"name": "Date", "value": "Tue, 14 Nov 2023 12:00:00 +0000"}
                        ],
                        "body": {"data": "VGhpcyBpcyBhIHRlc3QgZW1haWwgYm9keQ"}
                    }
                });
                format!(
                    "--BND\r\nContent-Type: application/http\r\nContent-ID: <response-item-{i}>\r\n\r\n\
                     HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{message}\r\n"
                )
            })
            .collect();
        let mut body = parts.join("");
        body.push_str("--BND--\r\n");
        Mock::given(method("POST"))
            .and(path("/batch/gmail/v1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "multipart/mixed; boundary=BND"),
            )
            .mount(server)
            .await;
    }

    fn pipeline(server_uri: &str, store: EmailStore) -> IngestionPipeline {
        let http_client = reqwest::Client::new();
        let client =
            GmailClient::new(http_client.clone(), "tok".to_string()).with_base_url(server_uri);
        IngestionPipeline::new(
            client,
            store,
            Arc::new(StubEmbedder::new(8)),
            http_client,
        )
    }

    #[tokio::test]
    async fn test_full_sync_ingests_and_reconciles() {
        let server = MockServer::start().await;
        mock_gmail(&server, &["m1", "m2"]).await;

        let store = EmailStore::new(db_core::connect_in_memory().await);
        // a stale local row the remote listing no longer returns
        let mut stale = stored_fixture("stale");
        stale.date_timestamp = 1_700_000_000;
        store.upsert_emails_batch(vec![stale]).await.unwrap();

        let pipeline = pipeline(&server.uri(), store.clone());
        let synced = pipeline
            .full_sync(
                &FullSyncOptions {
                    max_emails: 100,
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(synced, 2);
        assert_eq!(store.count().await.unwrap(), 2);
        let m1 = store.get_email("m1").await.unwrap().unwrap();
        assert_eq!(m1.document, "This is a test email body");
        assert_eq!(m1.labels, "|INBOX|UNREAD|");
        assert!(!m1.is_read);
        // stale row reconciled away
        assert!(store.get_email("stale").await.unwrap().is_none());

        let state = store.get_sync_state().await.unwrap().unwrap();
        assert_eq!(state.last_history_id, "9999");
        assert_eq!(state.total_emails_synced, 2);
    }

    #[tokio::test]
    async fn test_full_sync_skips_already_stored() {
        let server = MockServer::start().await;
        mock_gmail(&server, &["m1", "m2"]).await;

        let store = EmailStore::new(db_core::connect_in_memory().await);
        let pipeline = pipeline(&server.uri(), store.clone());
        let opts = FullSyncOptions {
            max_emails: 100,
            ..Default::default()
        };
        assert_eq!(pipeline.full_sync(&opts, None).await.unwrap(), 2);
        // second run dedupes everything
        assert_eq!(pipeline.full_sync(&opts, None).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_incremental_requires_cursor() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        let server = MockServer::start().await;
        let pipeline = pipeline(&server.uri(), store);
        let err = pipeline.incremental_sync().await.unwrap_err();
        assert!(matches!(err, AppError::Sync(_)));
    }

    #[tokio::test]
    async fn test_incremental_history_gone_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/history"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mock_gmail(&server, &["m1"]).await;

        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .update_sync_state(entity::sync_state::Model {
                id: "state".to_string(),
                last_history_id: "0".to_string(),
                last_full_sync: String::new(),
                total_emails_synced: 0,
            })
            .await
            .unwrap();

        let pipeline = pipeline(&server.uri(), store.clone());
        let summary = pipeline.incremental_sync().await.unwrap();
        assert!(summary.fallback);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.refreshed, 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incremental_applies_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/history"))
            .and(query_param("startHistoryId", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [
                    {"id": "51", "messagesAdded": [{"message": {"id": "m1"}}]},
                    {"id": "52", "messagesDeleted": [{"message": {"id": "gone"}}]},
                    {"id": "53", "labelsAdded": [{"message": {"id": "kept"}, "labelIds": ["STARRED"]}]}
                ],
                "historyId": "53"
            })))
            .mount(&server)
            .await;
        mock_gmail(&server, &["m1"]).await;
        // metadata refresh for "kept" goes through the same batch endpoint
        // mock; it only returns m1, so the refresh silently misses "kept",
        // which is fine for this test's added/deleted accounting
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_emails_batch(vec![stored_fixture("gone"), stored_fixture("kept")])
            .await
            .unwrap();
        store
            .update_sync_state(entity::sync_state::Model {
                id: "state".to_string(),
                last_history_id: "50".to_string(),
                last_full_sync: String::new(),
                total_emails_synced: 2,
            })
            .await
            .unwrap();

        let pipeline = pipeline(&server.uri(), store.clone());
        let summary = pipeline.incremental_sync().await.unwrap();
        assert!(!summary.fallback);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.deleted, 1);
        assert!(store.get_email("gone").await.unwrap().is_none());
        assert!(store.get_email("m1").await.unwrap().is_some());

        let state = store.get_sync_state().await.unwrap().unwrap();
        assert_eq!(state.last_history_id, "9999");
        assert_eq!(state.total_emails_synced, 3);
    }

    fn stored_fixture(id: &str) -> email::Model {
        email::Model {
            id: id.to_string(),
            thread_id: String::new(),
            subject: String::new(),
            sender: String::new(),
            recipients_to: String::new(),
            recipients_cc: String::new(),
            recipients_bcc: String::new(),
            date_iso: String::new(),
            date_timestamp: 0,
            snippet: String::new(),
            is_read: true,
            is_starred: false,
            is_draft: false,
            has_attachments: false,
            labels: String::new(),
            history_id: String::new(),
            size_estimate: 0,
            list_unsubscribe: String::new(),
            category: "Other".to_string(),
            document: String::new(),
            embedding: None,
            actions_extracted: false,
            action_items_json: "[]".to_string(),
            has_action_items: false,
            spending_json: "{}".to_string(),
            has_transactions: false,
            llm_categorized: false,
        }
    }
}
