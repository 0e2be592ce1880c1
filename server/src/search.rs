use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::embeddings::Embedder;
use crate::error::AppResult;
use crate::store::{EmailFilter, EmailStore, StoredEmail};

/// RRF constant.
const RRF_K: f64 = 60.0;
const SEMANTIC_WEIGHT: f64 = 0.7;
/// Both input lists are fetched at this multiple of the requested limit
/// before fusion.
const POOL_FACTOR: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub email: StoredEmail,
    pub score: f64,
}

fn sort_by_date_desc(hits: &mut [SearchHit]) {
    hits.sort_by_key(|h| std::cmp::Reverse(h.email.date_timestamp));
}

#[derive(Clone)]
pub struct EmailSearch {
    store: EmailStore,
    embedder: Arc<dyn Embedder>,
}

impl EmailSearch {
    pub fn new(store: EmailStore, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Vector search; cosine distance converts to similarity as `1 - d`.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f64>,
    ) -> AppResult<Vec<SearchHit>> {
        let embedder = self.embedder.clone();
        let query = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.encode(&query))
            .await
            .context("embedding task panicked")??;

        let neighbors = self
            .store
            .query_nearest(&vector, limit, &EmailFilter::default())
            .await?;

        let mut hits: Vec<SearchHit> = neighbors
            .into_iter()
            .map(|(email, distance)| SearchHit {
                email,
                score: 1.0 - distance as f64,
            })
            .filter(|hit| threshold.map_or(true, |t| hit.score >= t))
            .collect();
        sort_by_date_desc(&mut hits);
        Ok(hits)
    }

    /// Case-insensitive substring scan over subject + document across the
    /// whole corpus. Linear, which is fine at local scale.
    pub async fn fulltext_search(&self, query: &str, limit: usize) -> AppResult<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let emails = self.store.get_all_emails().await?;

        let mut hits: Vec<SearchHit> = emails
            .into_iter()
            .filter(|e| {
                format!("{} {}", e.subject, e.document)
                    .to_lowercase()
                    .contains(&query_lower)
            })
            .map(|email| SearchHit { email, score: 1.0 })
            .collect();
        sort_by_date_desc(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// Reciprocal rank fusion of semantic and fulltext results. Fulltext
    /// hits are prepended before the RRF-ranked remainder so exact substring
    /// matches always survive the cut, then the combined page is ordered by
    /// date.
    pub async fn hybrid_search(&self, query: &str, limit: usize) -> AppResult<Vec<SearchHit>> {
        let pool = limit.saturating_mul(POOL_FACTOR).max(limit);
        let semantic = self.semantic_search(query, pool, None).await?;
        let fulltext = self.fulltext_search(query, pool).await?;

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut result_map: HashMap<String, SearchHit> = HashMap::new();

        for (rank, hit) in semantic.into_iter().enumerate() {
            *scores.entry(hit.email.id.clone()).or_insert(0.0) +=
                SEMANTIC_WEIGHT / (RRF_K + rank as f64 + 1.0);
            result_map.entry(hit.email.id.clone()).or_insert(hit);
        }
        let mut fulltext_ids: Vec<String> = Vec::new();
        for (rank, hit) in fulltext.into_iter().enumerate() {
            *scores.entry(hit.email.id.clone()).or_insert(0.0) +=
                (1.0 - SEMANTIC_WEIGHT) / (RRF_K + rank as f64 + 1.0);
            fulltext_ids.push(hit.email.id.clone());
            result_map.entry(hit.email.id.clone()).or_insert(hit);
        }

        let mut ranked: Vec<String> = scores.keys().cloned().collect();
        ranked.sort_by(|a, b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });

        let fulltext_set: HashSet<&String> = fulltext_ids.iter().collect();
        let combined: Vec<String> = fulltext_ids
            .iter()
            .cloned()
            .chain(ranked.into_iter().filter(|id| !fulltext_set.contains(id)))
            .take(limit)
            .collect();

        let mut hits: Vec<SearchHit> = combined
            .into_iter()
            .filter_map(|id| {
                result_map.remove(&id).map(|mut hit| {
                    hit.score = scores.get(&hit.email.id).copied().unwrap_or(0.0);
                    hit
                })
            })
            .collect();
        sort_by_date_desc(&mut hits);
        Ok(hits)
    }

    /// The store does not sort, so fetch every match, order by date, then
    /// paginate.
    pub async fn filter_emails(
        &self,
        filter: &EmailFilter,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<StoredEmail>> {
        let mut emails = self.store.get_emails(filter, None, None).await?;
        emails.sort_by_key(|e| std::cmp::Reverse(e.date_timestamp));
        Ok(emails.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn get_thread_emails(&self, thread_id: &str) -> AppResult<Vec<StoredEmail>> {
        let filter = EmailFilter {
            thread_id: Some(thread_id.to_string()),
            ..Default::default()
        };
        self.store.get_emails(&filter, None, None).await
    }

    pub async fn get_emails_by_sender(
        &self,
        sender: &str,
        limit: usize,
    ) -> AppResult<Vec<StoredEmail>> {
        let filter = EmailFilter {
            sender_contains: Some(sender.to_string()),
            ..Default::default()
        };
        self.store.get_emails(&filter, Some(limit as u64), None).await
    }

    pub async fn get_emails_by_label(
        &self,
        label: &str,
        limit: usize,
    ) -> AppResult<Vec<StoredEmail>> {
        let filter = EmailFilter {
            label: Some(label.to_string()),
            ..Default::default()
        };
        self.store.get_emails(&filter, Some(limit as u64), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_core;
    use crate::embeddings::testing::StubEmbedder;
    use crate::store::to_blob;
    use entity::email;

    fn email_row(id: &str, subject: &str, document: &str, ts: i64, vector: &[f32]) -> email::Model {
        email::Model {
            id: id.to_string(),
            thread_id: format!("t_{id}"),
            subject: subject.to_string(),
            sender: "someone@example.com".to_string(),
            recipients_to: String::new(),
            recipients_cc: String::new(),
            recipients_bcc: String::new(),
            date_iso: String::new(),
            date_timestamp: ts,
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
            document: document.to_string(),
            embedding: Some(to_blob(vector)),
            actions_extracted: false,
            action_items_json: "[]".to_string(),
            has_action_items: false,
            spending_json: "{}".to_string(),
            has_transactions: false,
            llm_categorized: false,
        }
    }

    async fn search_over(rows: Vec<email::Model>) -> EmailSearch {
        let store = EmailStore::new(db_core::connect_in_memory().await);
        store.upsert_emails_batch(rows).await.unwrap();
        // dimension matches the stub embedder used to build query vectors
        EmailSearch::new(store, Arc::new(StubEmbedder::new(4)))
    }

    fn stub_vector(text: &str) -> Vec<f32> {
        StubEmbedder::new(4).encode(text).unwrap()
    }

    #[tokio::test]
    async fn test_fulltext_is_case_insensitive_and_date_ordered() {
        let search = search_over(vec![
            email_row("old", "Widgetron release", "", 100, &[1.0, 0.0, 0.0, 0.0]),
            email_row("new", "", "all about WIDGETRON", 200, &[0.0, 1.0, 0.0, 0.0]),
            email_row("other", "nothing", "here", 300, &[0.0, 0.0, 1.0, 0.0]),
        ])
        .await;

        let hits = search.fulltext_search("widgetron", 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.email.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_semantic_search_threshold() {
        let query_vec = stub_vector("target text");
        let search = search_over(vec![
            email_row("exact", "", "", 100, &query_vec),
            email_row("orthogonal", "", "", 200, &[0.0, 0.0, 0.0, 1.0]),
        ])
        .await;

        let hits = search
            .semantic_search("target text", 10, Some(0.99))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].email.id, "exact");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_hybrid_guarantees_exact_substring_hits() {
        // one email contains the literal token; its vector is orthogonal to
        // the query vector so pure semantic ranking would bury it
        let query_vec = stub_vector("widgetron");
        let mut orthogonal = vec![0.0; 4];
        let axis = query_vec
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        orthogonal[axis] = 1.0;

        let mut rows = vec![email_row(
            "needle",
            "",
            "the secret widgetron prototype",
            1,
            &orthogonal,
        )];
        for i in 0..99 {
            rows.push(email_row(
                &format!("hay_{i}"),
                "",
                "unrelated text",
                1000 + i,
                &query_vec,
            ));
        }
        let search = search_over(rows).await;

        let hits = search.hybrid_search("widgetron", 5).await.unwrap();
        assert!(hits.len() <= 5);
        assert!(hits
            .iter()
            .any(|h| h.email.document.contains("widgetron")));
    }

    #[tokio::test]
    async fn test_filter_emails_paginates_after_date_sort() {
        let search = search_over(vec![
            email_row("a", "x", "", 300, &[1.0, 0.0, 0.0, 0.0]),
            email_row("b", "x", "", 200, &[1.0, 0.0, 0.0, 0.0]),
            email_row("c", "x", "", 100, &[1.0, 0.0, 0.0, 0.0]),
        ])
        .await;

        let filter = EmailFilter {
            subject_contains: Some("x".to_string()),
            ..Default::default()
        };
        let page1 = search.filter_emails(&filter, 2, 0).await.unwrap();
        let page2 = search.filter_emails(&filter, 2, 2).await.unwrap();
        assert_eq!(
            page1.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(
            page2.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["c"]
        );
    }

    #[test]
    fn test_rrf_rank_is_non_decreasing_when_input_shrinks() {
        // removing a result from one input list never improves another's rank
        fn fused_rank(semantic: &[&str], fulltext: &[&str], target: &str) -> usize {
            let mut scores: HashMap<String, f64> = HashMap::new();
            for (rank, id) in semantic.iter().enumerate() {
                *scores.entry(id.to_string()).or_insert(0.0) +=
                    SEMANTIC_WEIGHT / (RRF_K + rank as f64 + 1.0);
            }
            for (rank, id) in fulltext.iter().enumerate() {
                *scores.entry(id.to_string()).or_insert(0.0) +=
                    (1.0 - SEMANTIC_WEIGHT) / (RRF_K + rank as f64 + 1.0);
            }
            let mut ranked: Vec<&String> = scores.keys().collect();
            ranked.sort_by(|a, b| scores[*b].partial_cmp(&scores[*a]).unwrap().then(a.cmp(b)));
            ranked.iter().position(|id| *id == target).unwrap()
        }

        let with_all = fused_rank(&["a", "b", "c"], &["b", "c"], "c");
        let with_b_removed = fused_rank(&["a", "c"], &["c"], "c");
        assert!(with_b_removed <= with_all);
    }
}
