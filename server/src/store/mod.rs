mod filter;
mod vectors;

pub use filter::EmailFilter;
pub use vectors::{cosine_distance, from_blob, l2_norm, to_blob};

use std::collections::HashSet;

use serde::Serialize;

use crate::db_core::prelude::*;
use crate::error::{AppError, AppResult};

/// Rows are written in chunks of this size, one transaction per chunk, so a
/// partial failure never leaves a half-written chunk behind.
const WRITE_CHUNK_SIZE: usize = 500;

/// An email row without its embedding blob, which is what search, analytics
/// and the HTTP layer read.
#[derive(Debug, Clone, FromQueryResult, Serialize)]
pub struct StoredEmail {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub recipients_to: String,
    pub recipients_cc: String,
    pub recipients_bcc: String,
    pub date_iso: String,
    pub date_timestamp: i64,
    pub snippet: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_draft: bool,
    pub has_attachments: bool,
    pub labels: String,
    pub history_id: String,
    pub size_estimate: i64,
    pub list_unsubscribe: String,
    pub category: String,
    pub document: String,
    pub actions_extracted: bool,
    pub action_items_json: String,
    pub has_action_items: bool,
    pub spending_json: String,
    pub has_transactions: bool,
    pub llm_categorized: bool,
}

/// Shallow-merge update: only `Some` fields are written, everything else on
/// the row is preserved.
#[derive(Debug, Default, Clone)]
pub struct EmailPatch {
    pub labels: Option<String>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub history_id: Option<String>,
    pub category: Option<String>,
    pub actions_extracted: Option<bool>,
    pub action_items_json: Option<String>,
    pub has_action_items: Option<bool>,
    pub spending_json: Option<String>,
    pub has_transactions: Option<bool>,
    pub llm_categorized: Option<bool>,
}

impl EmailPatch {
    fn into_active_model(self) -> email::ActiveModel {
        fn value<T: Into<sea_orm::Value>>(opt: Option<T>) -> ActiveValue<T> {
            match opt {
                Some(v) => ActiveValue::Set(v),
                None => ActiveValue::NotSet,
            }
        }
        email::ActiveModel {
            labels: value(self.labels),
            is_read: value(self.is_read),
            is_starred: value(self.is_starred),
            history_id: value(self.history_id),
            category: value(self.category),
            actions_extracted: value(self.actions_extracted),
            action_items_json: value(self.action_items_json),
            has_action_items: value(self.has_action_items),
            spending_json: value(self.spending_json),
            has_transactions: value(self.has_transactions),
            llm_categorized: value(self.llm_categorized),
            ..Default::default()
        }
    }
}

fn email_to_active(m: email::Model) -> email::ActiveModel {
    email::ActiveModel {
        id: Set(m.id),
        thread_id: Set(m.thread_id),
        subject: Set(m.subject),
        sender: Set(m.sender),
        recipients_to: Set(m.recipients_to),
        recipients_cc: Set(m.recipients_cc),
        recipients_bcc: Set(m.recipients_bcc),
        date_iso: Set(m.date_iso),
        date_timestamp: Set(m.date_timestamp),
        snippet: Set(m.snippet),
        is_read: Set(m.is_read),
        is_starred: Set(m.is_starred),
        is_draft: Set(m.is_draft),
        has_attachments: Set(m.has_attachments),
        labels: Set(m.labels),
        history_id: Set(m.history_id),
        size_estimate: Set(m.size_estimate),
        list_unsubscribe: Set(m.list_unsubscribe),
        category: Set(m.category),
        document: Set(m.document),
        embedding: Set(m.embedding),
        actions_extracted: Set(m.actions_extracted),
        action_items_json: Set(m.action_items_json),
        has_action_items: Set(m.has_action_items),
        spending_json: Set(m.spending_json),
        has_transactions: Set(m.has_transactions),
        llm_categorized: Set(m.llm_categorized),
    }
}

fn expense_to_active(m: expense::Model) -> expense::ActiveModel {
    expense::ActiveModel {
        id: Set(m.id),
        document: Set(m.document),
        embedding: Set(m.embedding),
        amount: Set(m.amount),
        currency: Set(m.currency),
        merchant: Set(m.merchant),
        category: Set(m.category),
        source_sender: Set(m.source_sender),
        labels: Set(m.labels),
        date_iso: Set(m.date_iso),
        date_timestamp: Set(m.date_timestamp),
        confidence: Set(m.confidence),
        rule_name: Set(m.rule_name),
        source: Set(m.source),
        source_gmail_id: Set(m.source_gmail_id),
        thread_id: Set(m.thread_id),
        subject: Set(m.subject),
        notes: Set(m.notes),
    }
}

fn label_to_active(m: label::Model) -> label::ActiveModel {
    label::ActiveModel {
        id: Set(m.id),
        name: Set(m.name),
        label_type: Set(m.label_type),
        message_list_visibility: Set(m.message_list_visibility),
        label_list_visibility: Set(m.label_list_visibility),
        text_color: Set(m.text_color),
        background_color: Set(m.background_color),
    }
}

fn sync_state_to_active(m: sync_state::Model) -> sync_state::ActiveModel {
    sync_state::ActiveModel {
        id: Set(m.id),
        last_history_id: Set(m.last_history_id),
        last_full_sync: Set(m.last_full_sync),
        total_emails_synced: Set(m.total_emails_synced),
    }
}

#[derive(Clone)]
pub struct EmailStore {
    conn: DatabaseConnection,
}

impl EmailStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    fn stored_email_select() -> Select<Email> {
        Email::find()
            .select_only()
            .columns([
                email::Column::Id,
                email::Column::ThreadId,
                email::Column::Subject,
                email::Column::Sender,
                email::Column::RecipientsTo,
                email::Column::RecipientsCc,
                email::Column::RecipientsBcc,
                email::Column::DateIso,
                email::Column::DateTimestamp,
                email::Column::Snippet,
                email::Column::IsRead,
                email::Column::IsStarred,
                email::Column::IsDraft,
                email::Column::HasAttachments,
                email::Column::Labels,
                email::Column::HistoryId,
                email::Column::SizeEstimate,
                email::Column::ListUnsubscribe,
                email::Column::Category,
                email::Column::Document,
                email::Column::ActionsExtracted,
                email::Column::ActionItemsJson,
                email::Column::HasActionItems,
                email::Column::SpendingJson,
                email::Column::HasTransactions,
                email::Column::LlmCategorized,
            ])
    }

    // --- Emails ---

    pub async fn count(&self) -> AppResult<u64> {
        Ok(Email::find().count(&self.conn).await?)
    }

    pub async fn upsert_emails_batch(&self, rows: Vec<email::Model>) -> AppResult<()> {
        for chunk in rows.chunks(WRITE_CHUNK_SIZE) {
            let models = chunk.iter().cloned().map(email_to_active);
            let txn = self.conn.begin().await?;
            Email::insert_many(models)
                .on_conflict(
                    OnConflict::column(email::Column::Id)
                        .update_columns([
                            email::Column::ThreadId,
                            email::Column::Subject,
                            email::Column::Sender,
                            email::Column::RecipientsTo,
                            email::Column::RecipientsCc,
                            email::Column::RecipientsBcc,
                            email::Column::DateIso,
                            email::Column::DateTimestamp,
                            email::Column::Snippet,
                            email::Column::IsRead,
                            email::Column::IsStarred,
                            email::Column::IsDraft,
                            email::Column::HasAttachments,
                            email::Column::Labels,
                            email::Column::HistoryId,
                            email::Column::SizeEstimate,
                            email::Column::ListUnsubscribe,
                            email::Column::Category,
                            email::Column::Document,
                            email::Column::Embedding,
                            email::Column::ActionsExtracted,
                            email::Column::ActionItemsJson,
                            email::Column::HasActionItems,
                            email::Column::SpendingJson,
                            email::Column::HasTransactions,
                            email::Column::LlmCategorized,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
            txn.commit().await?;
        }
        Ok(())
    }

    pub async fn update_emails_batch(
        &self,
        patches: Vec<(String, EmailPatch)>,
    ) -> AppResult<()> {
        for chunk in patches.chunks(WRITE_CHUNK_SIZE) {
            let txn = self.conn.begin().await?;
            for (id, patch) in chunk.iter().cloned() {
                Email::update_many()
                    .set(patch.into_active_model())
                    .filter(email::Column::Id.eq(id))
                    .exec(&txn)
                    .await?;
            }
            txn.commit().await?;
        }
        Ok(())
    }

    pub async fn get_email(&self, id: &str) -> AppResult<Option<StoredEmail>> {
        Ok(Self::stored_email_select()
            .filter(email::Column::Id.eq(id))
            .into_model::<StoredEmail>()
            .one(&self.conn)
            .await?)
    }

    pub async fn get_emails(
        &self,
        filter: &EmailFilter,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> AppResult<Vec<StoredEmail>> {
        let mut query = Self::stored_email_select().filter(filter.condition());
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        if let Some(offset) = offset {
            query = query.offset(offset);
        }
        Ok(query.into_model::<StoredEmail>().all(&self.conn).await?)
    }

    pub async fn get_all_emails(&self) -> AppResult<Vec<StoredEmail>> {
        self.get_emails(&EmailFilter::default(), None, None).await
    }

    /// Nearest neighbors by cosine distance over the stored unit vectors.
    /// Rows without an embedding are excluded; a stored vector whose
    /// dimension differs from the query's is a hard error.
    pub async fn query_nearest(
        &self,
        vector: &[f32],
        n_results: usize,
        filter: &EmailFilter,
    ) -> AppResult<Vec<(StoredEmail, f32)>> {
        #[derive(FromQueryResult)]
        struct EmbeddingRow {
            id: String,
            embedding: Option<Vec<u8>>,
        }

        let rows = Email::find()
            .select_only()
            .columns([email::Column::Id, email::Column::Embedding])
            .filter(filter.condition())
            .filter(email::Column::Embedding.is_not_null())
            .into_model::<EmbeddingRow>()
            .all(&self.conn)
            .await?;

        let mut scored: Vec<(String, f32)> = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(blob) = row.embedding else { continue };
            let stored = from_blob(&blob).map_err(|e| AppError::Embedding(e.to_string()))?;
            if stored.len() != vector.len() {
                return Err(AppError::Embedding(format!(
                    "stored vector dimension {} does not match query dimension {}",
                    stored.len(),
                    vector.len()
                )));
            }
            scored.push((row.id, cosine_distance(vector, &stored)));
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);

        let ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        let emails = Self::stored_email_select()
            .filter(email::Column::Id.is_in(ids))
            .into_model::<StoredEmail>()
            .all(&self.conn)
            .await?;

        // restore distance order, `is_in` does not preserve it
        let mut results = Vec::with_capacity(scored.len());
        for (id, distance) in scored {
            if let Some(e) = emails.iter().find(|e| e.id == id) {
                results.push((e.clone(), distance));
            }
        }
        Ok(results)
    }

    /// Fast point-exists probe used by the ingest dedup pass.
    pub async fn get_existing_ids(&self, ids: &[String]) -> AppResult<HashSet<String>> {
        let mut existing = HashSet::new();
        for chunk in ids.chunks(WRITE_CHUNK_SIZE) {
            let found: Vec<String> = Email::find()
                .select_only()
                .column(email::Column::Id)
                .filter(email::Column::Id.is_in(chunk.iter().cloned()))
                .into_tuple()
                .all(&self.conn)
                .await?;
            existing.extend(found);
        }
        Ok(existing)
    }

    pub async fn get_all_ids(&self, filter: Option<&EmailFilter>) -> AppResult<Vec<String>> {
        let mut query = Email::find().select_only().column(email::Column::Id);
        if let Some(filter) = filter {
            query = query.filter(filter.condition());
        }
        Ok(query.into_tuple().all(&self.conn).await?)
    }

    pub async fn delete_emails(&self, ids: &[String]) -> AppResult<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(WRITE_CHUNK_SIZE) {
            let res = Email::delete_many()
                .filter(email::Column::Id.is_in(chunk.iter().cloned()))
                .exec(&self.conn)
                .await?;
            deleted += res.rows_affected;
        }
        Ok(deleted)
    }

    // --- Labels ---

    pub async fn upsert_label(&self, row: label::Model) -> AppResult<()> {
        Label::insert(label_to_active(row))
            .on_conflict(
                OnConflict::column(label::Column::Id)
                    .update_columns([
                        label::Column::Name,
                        label::Column::LabelType,
                        label::Column::MessageListVisibility,
                        label::Column::LabelListVisibility,
                        label::Column::TextColor,
                        label::Column::BackgroundColor,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn get_labels(&self) -> AppResult<Vec<label::Model>> {
        Ok(Label::find().all(&self.conn).await?)
    }

    // --- Sync state ---

    pub async fn get_sync_state(&self) -> AppResult<Option<sync_state::Model>> {
        Ok(SyncState::find_by_id("state").one(&self.conn).await?)
    }

    /// Replaces the single state row atomically; partial sync failures never
    /// reach this point, so the cursor only moves on success.
    pub async fn update_sync_state(&self, state: sync_state::Model) -> AppResult<()> {
        SyncState::insert(sync_state_to_active(state))
            .on_conflict(
                OnConflict::column(sync_state::Column::Id)
                    .update_columns([
                        sync_state::Column::LastHistoryId,
                        sync_state::Column::LastFullSync,
                        sync_state::Column::TotalEmailsSynced,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    // --- Expenses ---

    pub async fn upsert_expenses_batch(&self, rows: Vec<expense::Model>) -> AppResult<()> {
        for chunk in rows.chunks(WRITE_CHUNK_SIZE) {
            let models = chunk.iter().cloned().map(expense_to_active);
            let txn = self.conn.begin().await?;
            Expense::insert_many(models)
                .on_conflict(
                    OnConflict::column(expense::Column::Id)
                        .update_columns([
                            expense::Column::Document,
                            expense::Column::Embedding,
                            expense::Column::Amount,
                            expense::Column::Currency,
                            expense::Column::Merchant,
                            expense::Column::Category,
                            expense::Column::SourceSender,
                            expense::Column::Labels,
                            expense::Column::DateIso,
                            expense::Column::DateTimestamp,
                            expense::Column::Confidence,
                            expense::Column::RuleName,
                            expense::Column::Source,
                            expense::Column::SourceGmailId,
                            expense::Column::ThreadId,
                            expense::Column::Subject,
                            expense::Column::Notes,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
            txn.commit().await?;
        }
        Ok(())
    }

    pub async fn get_all_expenses(&self) -> AppResult<Vec<expense::Model>> {
        Ok(Expense::find().all(&self.conn).await?)
    }

    pub async fn delete_expenses(&self, ids: &[String]) -> AppResult<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(WRITE_CHUNK_SIZE) {
            let res = Expense::delete_many()
                .filter(expense::Column::Id.is_in(chunk.iter().cloned()))
                .exec(&self.conn)
                .await?;
            deleted += res.rows_affected;
        }
        Ok(deleted)
    }

    /// Rule-sourced rows are wiped and rebuilt on every reprocess.
    pub async fn delete_rule_expenses(&self) -> AppResult<u64> {
        let res = Expense::delete_many()
            .filter(expense::Column::Source.eq("rule"))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }

    /// Deleting an email also deletes the expense derived from it.
    pub async fn delete_expenses_for_emails(&self, email_ids: &[String]) -> AppResult<u64> {
        let mut deleted = 0;
        for chunk in email_ids.chunks(WRITE_CHUNK_SIZE) {
            let res = Expense::delete_many()
                .filter(
                    Condition::any()
                        .add(expense::Column::Id.is_in(chunk.iter().cloned()))
                        .add(expense::Column::SourceGmailId.is_in(chunk.iter().cloned())),
                )
                .filter(expense::Column::Source.ne("manual"))
                .exec(&self.conn)
                .await?;
            deleted += res.rows_affected;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_core;

    fn email_row(id: &str, document: &str) -> email::Model {
        email::Model {
            id: id.to_string(),
            thread_id: format!("thread_{id}"),
            subject: format!("Subject {id}"),
            sender: "Sender <sender@example.com>".to_string(),
            recipients_to: "me@example.com".to_string(),
            recipients_cc: String::new(),
            recipients_bcc: String::new(),
            date_iso: "2024-03-01T12:00:00+00:00".to_string(),
            date_timestamp: 1_709_294_400,
            snippet: "snippet".to_string(),
            is_read: false,
            is_starred: false,
            is_draft: false,
            has_attachments: false,
            labels: "|INBOX|UNREAD|".to_string(),
            history_id: "100".to_string(),
            size_estimate: 1024,
            list_unsubscribe: String::new(),
            category: "Other".to_string(),
            document: document.to_string(),
            embedding: Some(to_blob(&[1.0, 0.0, 0.0])),
            actions_extracted: false,
            action_items_json: "[]".to_string(),
            has_action_items: false,
            spending_json: "{}".to_string(),
            has_transactions: false,
            llm_categorized: false,
        }
    }

    fn expense_row(id: &str, source: &str, source_gmail_id: &str) -> expense::Model {
        expense::Model {
            id: id.to_string(),
            document: "NETFLIX 15.49 USD".to_string(),
            embedding: None,
            amount: 15.49,
            currency: "USD".to_string(),
            merchant: "NETFLIX".to_string(),
            category: "Uncategorized".to_string(),
            source_sender: "alerts@chase.com".to_string(),
            labels: String::new(),
            date_iso: "2024-03-01T12:00:00+00:00".to_string(),
            date_timestamp: 1_709_294_400,
            confidence: 0.8,
            rule_name: "Chase Transactions".to_string(),
            source: source.to_string(),
            source_gmail_id: source_gmail_id.to_string(),
            thread_id: String::new(),
            subject: String::new(),
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_latest_wins() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_emails_batch(vec![email_row("m1", "first body")])
            .await
            .unwrap();
        store
            .upsert_emails_batch(vec![email_row("m1", "second body")])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let row = store.get_email("m1").await.unwrap().unwrap();
        assert_eq!(row.document, "second body");
    }

    #[tokio::test]
    async fn test_patch_is_shallow_merge() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_emails_batch(vec![email_row("m1", "body")])
            .await
            .unwrap();

        store
            .update_emails_batch(vec![(
                "m1".to_string(),
                EmailPatch {
                    category: Some("Money".to_string()),
                    actions_extracted: Some(true),
                    ..Default::default()
                },
            )])
            .await
            .unwrap();

        let row = store.get_email("m1").await.unwrap().unwrap();
        assert_eq!(row.category, "Money");
        assert!(row.actions_extracted);
        // untouched fields survive
        assert_eq!(row.labels, "|INBOX|UNREAD|");
        assert_eq!(row.document, "body");
    }

    #[tokio::test]
    async fn test_existing_ids_is_intersection() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_emails_batch(vec![email_row("a", ""), email_row("b", "")])
            .await
            .unwrap();

        let probe = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let existing = store.get_existing_ids(&probe).await.unwrap();
        assert_eq!(
            existing,
            HashSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_emails_batch(vec![email_row("a", "")])
            .await
            .unwrap();

        let ids = vec!["a".to_string()];
        assert_eq!(store.delete_emails(&ids).await.unwrap(), 1);
        assert_eq!(store.delete_emails(&ids).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_nearest_orders_by_distance_and_skips_vectorless() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        let mut near = email_row("near", "near");
        near.embedding = Some(to_blob(&[1.0, 0.0, 0.0]));
        let mut far = email_row("far", "far");
        far.embedding = Some(to_blob(&[0.0, 1.0, 0.0]));
        let mut none = email_row("none", "none");
        none.embedding = None;
        store
            .upsert_emails_batch(vec![near, far, none])
            .await
            .unwrap();

        let results = store
            .query_nearest(&[1.0, 0.0, 0.0], 10, &EmailFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = results.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(results[0].1 < results[1].1);
    }

    #[tokio::test]
    async fn test_query_nearest_rejects_dimension_mismatch() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_emails_batch(vec![email_row("a", "")])
            .await
            .unwrap();

        let err = store
            .query_nearest(&[1.0, 0.0], 5, &EmailFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_sync_state_is_replaced() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        assert!(store.get_sync_state().await.unwrap().is_none());

        store
            .update_sync_state(sync_state::Model {
                id: "state".to_string(),
                last_history_id: "42".to_string(),
                last_full_sync: "2024-03-01T00:00:00+00:00".to_string(),
                total_emails_synced: 10,
            })
            .await
            .unwrap();
        store
            .update_sync_state(sync_state::Model {
                id: "state".to_string(),
                last_history_id: "43".to_string(),
                last_full_sync: "2024-03-02T00:00:00+00:00".to_string(),
                total_emails_synced: 15,
            })
            .await
            .unwrap();

        let state = store.get_sync_state().await.unwrap().unwrap();
        assert_eq!(state.last_history_id, "43");
        assert_eq!(state.total_emails_synced, 15);
    }

    #[tokio::test]
    async fn test_expense_lifecycle() {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store
            .upsert_expenses_batch(vec![
                expense_row("m1", "rule", "m1"),
                expense_row("manual_abc", "manual", ""),
                expense_row("m2", "llm", "m2"),
            ])
            .await
            .unwrap();

        // rule-sourced rows wiped on reprocess, manual ones survive
        assert_eq!(store.delete_rule_expenses().await.unwrap(), 1);
        assert_eq!(store.get_all_expenses().await.unwrap().len(), 2);

        // deleting the source email removes its derived expense
        store
            .delete_expenses_for_emails(&["m2".to_string()])
            .await
            .unwrap();
        let remaining = store.get_all_expenses().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "manual_abc");
    }
}
