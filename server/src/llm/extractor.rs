use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::categorizer::{Categorizer, EmailSignals};
use crate::error::AppResult;
use crate::llm::client::call_llm;
use crate::store::{EmailPatch, EmailStore};
use entity::expense;

const CHUNK_SIZE: usize = 40;
const MAX_IN_FLIGHT: usize = 8;
const CHUNK_TIMEOUT_SECS: f64 = 120.0;

/// What the enrichment prompt needs per email, plus the fields the heuristic
/// fallback and the expense writer read.
#[derive(Debug, Clone)]
pub struct EnrichmentInput {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub snippet: String,
    pub labels: String,
    pub list_unsubscribe: String,
    pub thread_id: String,
    pub date_iso: String,
    pub date_timestamp: i64,
}

impl EnrichmentInput {
    pub fn from_stored(email: &crate::store::StoredEmail) -> Self {
        Self {
            id: email.id.clone(),
            subject: email.subject.clone(),
            sender: email.sender.clone(),
            snippet: email.snippet.clone(),
            labels: email.labels.clone(),
            list_unsubscribe: email.list_unsubscribe.clone(),
            thread_id: email.thread_id.clone(),
            date_iso: email.date_iso.clone(),
            date_timestamp: email.date_timestamp,
        }
    }

    fn signals(&self) -> EmailSignals<'_> {
        EmailSignals {
            sender: &self.sender,
            subject: &self.subject,
            labels: &self.labels,
            list_unsubscribe: &self.list_unsubscribe,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Urgency {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub action: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spending {
    #[serde(default)]
    pub is_transaction: bool,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// One structured transaction as the model reports it. Everything is
/// optional; the prompt fixes the value vocabularies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub merchant_normalized: Option<String>,
    #[serde(default)]
    pub merchant_category: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub card_network: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_recurring: Option<bool>,
    #[serde(default)]
    pub recurrence_period: Option<String>,
    #[serde(default)]
    pub is_international: Option<bool>,
    #[serde(default)]
    pub foreign_amount: Option<f64>,
    #[serde(default)]
    pub foreign_currency: Option<String>,
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub category: String,
    pub action_items: Vec<ActionItem>,
    pub spending: Spending,
    /// true when the LLM answered for this email; false when the chunk fell
    /// back to heuristics.
    pub extracted: bool,
}

fn heuristic_result(categorizer: &Categorizer, email: &EnrichmentInput) -> EnrichmentResult {
    EnrichmentResult {
        category: categorizer.categorize(email.signals()),
        action_items: vec![],
        spending: Spending::default(),
        extracted: false,
    }
}

fn truncated(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn build_prompt(categories: &[String], batch: &[EnrichmentInput]) -> String {
    let today = Utc::now().date_naive().to_string();
    let items = batch
        .iter()
        .map(|e| {
            format!(
                "EMAIL_ID: {}\nSender: {}\nSubject: {}\nSnippet: {}",
                e.id,
                truncated(&e.sender, 60),
                truncated(&e.subject, 80),
                truncated(&e.snippet, 400),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Today is {today}. For each email do three things:\n\
         1. Categorize into exactly one of: {categories}\n\
         2. Extract action items required FROM THE RECIPIENT (deadlines if mentioned, urgency: high/medium/low)\n\
         3. Extract spending/transaction data if the email is a receipt, payment confirmation, bank alert, or invoice.\n   \
         For spending, capture: amount, currency, merchant, merchant_normalized, merchant_category (specific e.g. Groceries/SaaS/Flights/Dining), \
         transaction_type (purchase|refund|transfer|subscription|bill|fee|atm|other), \
         payment_method (credit_card|debit_card|bank_transfer|upi|wallet|bnpl|cash|other), \
         card_last4, card_network (Visa|Mastercard|Amex|Discover|RuPay|other), account_name, \
         date (YYYY-MM-DD, use transaction date not email date), description, \
         is_recurring (bool), recurrence_period (monthly|annual|weekly|quarterly|null), \
         is_international (bool), foreign_amount, foreign_currency, exchange_rate, \
         reference_id (order/txn ID), status (completed|pending|failed|reversed|disputed).\n\
         Return ONLY a JSON array, no markdown:\n\
         [{{\"id\":\"<id>\",\"category\":\"<cat>\",\"action_items\":[{{\"action\":\"...\",\"deadline\":\"YYYY-MM-DD or null\",\"urgency\":\"high|medium|low\"}}],\
         \"spending\":{{\"is_transaction\":false,\"transactions\":[]}}}}]\n\
         Include every email id. Use action_items:[] and spending:{{\"is_transaction\":false,\"transactions\":[]}} if none apply.\n\n\
         {items}",
        categories = categories.join(", "),
    )
}

/// The first `[` to the last `]` of the runner output must parse as a JSON
/// array.
fn parse_response_array(raw: &str) -> Option<Vec<serde_json::Value>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    serde_json::from_str(&raw[start..=end]).ok()
}

async fn extract_chunk(
    http_client: &reqwest::Client,
    categorizer: &Categorizer,
    batch: &[EnrichmentInput],
) -> HashMap<String, EnrichmentResult> {
    let categories = categorizer.all_category_names();
    let prompt = build_prompt(&categories, batch);

    // -- DEBUG
    // println!("Prompt: {}", prompt.chars().take(400).collect::<String>());
    // -- DEBUG

    let parsed = match call_llm(http_client, &prompt, CHUNK_TIMEOUT_SECS).await {
        Ok(raw) => parse_response_array(&raw),
        Err(e) => {
            tracing::warn!("Enrichment chunk failed ({}), using heuristics", e);
            None
        }
    };

    let Some(parsed) = parsed else {
        return batch
            .iter()
            .map(|e| (e.id.clone(), heuristic_result(categorizer, e)))
            .collect();
    };

    let by_id: HashMap<String, &serde_json::Value> = parsed
        .iter()
        .filter_map(|item| {
            item.get("id")
                .and_then(|v| v.as_str())
                .map(|id| (id.to_string(), item))
        })
        .collect();

    let mut fallbacks = 0usize;
    let results = batch
        .iter()
        .map(|e| {
            let item = by_id.get(&e.id);
            let category = item
                .and_then(|i| i.get("category"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            let result = match category.filter(|c| categories.contains(c)) {
                Some(category) => {
                    let action_items = item
                        .and_then(|i| i.get("action_items"))
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default();
                    let spending = item
                        .and_then(|i| i.get("spending"))
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default();
                    EnrichmentResult {
                        category,
                        action_items,
                        spending,
                        extracted: true,
                    }
                }
                None => {
                    fallbacks += 1;
                    heuristic_result(categorizer, e)
                }
            };
            (e.id.clone(), result)
        })
        .collect();

    if fallbacks > 0 {
        tracing::warn!(
            "{}/{} categories fell back to heuristics",
            fallbacks,
            batch.len()
        );
    }
    results
}

/// Run enrichment over the inputs: chunks of 40, up to 8 chunks in flight.
/// A failed chunk downgrades to heuristics and never poisons the others.
pub async fn extract_batch(
    http_client: &reqwest::Client,
    categorizer: &Categorizer,
    emails: &[EnrichmentInput],
    progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
) -> HashMap<String, EnrichmentResult> {
    let total = emails.len();
    let chunks: Vec<Vec<EnrichmentInput>> = emails
        .chunks(CHUNK_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect();
    tracing::info!(
        "Enriching {} emails across {} chunks, {} in flight",
        total,
        chunks.len(),
        MAX_IN_FLIGHT
    );

    let done = Mutex::new(0usize);
    let results: Vec<HashMap<String, EnrichmentResult>> = stream::iter(chunks)
        .map(|chunk| {
            let done = &done;
            async move {
                let chunk_results = extract_chunk(http_client, categorizer, &chunk).await;
                let mut done = done.lock().unwrap();
                *done += chunk.len();
                if let Some(progress) = progress {
                    progress((*done).min(total), total);
                }
                chunk_results
            }
        })
        .buffer_unordered(MAX_IN_FLIGHT)
        .collect()
        .await;

    results.into_iter().flatten().collect()
}

/// Write enrichment results back: shallow-merge metadata patches on the
/// email rows, and llm-sourced expense rows for extracted transactions.
pub async fn apply_enrichment(
    store: &EmailStore,
    inputs: &[EnrichmentInput],
    results: &HashMap<String, EnrichmentResult>,
) -> AppResult<()> {
    let mut patches = Vec::new();
    let mut expense_rows = Vec::new();

    for input in inputs {
        let Some(result) = results.get(&input.id) else {
            continue;
        };
        let action_items_json =
            serde_json::to_string(&result.action_items).unwrap_or_else(|_| "[]".to_string());
        let spending_json =
            serde_json::to_string(&result.spending).unwrap_or_else(|_| "{}".to_string());
        let has_transactions =
            result.spending.is_transaction && !result.spending.transactions.is_empty();

        patches.push((
            input.id.clone(),
            EmailPatch {
                category: Some(result.category.clone()),
                actions_extracted: Some(result.extracted),
                action_items_json: Some(action_items_json),
                has_action_items: Some(!result.action_items.is_empty()),
                spending_json: Some(spending_json),
                has_transactions: Some(has_transactions),
                llm_categorized: Some(result.extracted),
                ..Default::default()
            },
        ));

        if has_transactions {
            let tx = &result.spending.transactions[0];
            let merchant = tx
                .merchant_normalized
                .clone()
                .or_else(|| tx.merchant.clone())
                .unwrap_or_default();
            let amount = tx.amount.unwrap_or_default();
            let currency = tx.currency.clone().unwrap_or_else(|| "USD".to_string());
            expense_rows.push(expense::Model {
                id: input.id.clone(),
                document: format!("{} {} {} {}", merchant, input.subject, amount, currency),
                embedding: None,
                amount,
                currency,
                merchant,
                category: tx
                    .merchant_category
                    .clone()
                    .unwrap_or_else(|| "Uncategorized".to_string()),
                source_sender: input.sender.clone(),
                labels: input.labels.clone(),
                date_iso: input.date_iso.clone(),
                date_timestamp: input.date_timestamp,
                confidence: 0.9,
                rule_name: "llm".to_string(),
                source: "llm".to_string(),
                source_gmail_id: input.id.clone(),
                thread_id: input.thread_id.clone(),
                subject: input.subject.clone(),
                notes: String::new(),
            });
        }
    }

    store.update_emails_batch(patches).await?;
    if !expense_rows.is_empty() {
        store.upsert_expenses_batch(expense_rows).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn input(id: &str, sender: &str, subject: &str) -> EnrichmentInput {
        EnrichmentInput {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            snippet: String::new(),
            labels: String::new(),
            list_unsubscribe: String::new(),
            thread_id: String::new(),
            date_iso: String::new(),
            date_timestamp: 0,
        }
    }

    fn empty_categorizer() -> Categorizer {
        Categorizer::with_tables(HashMap::new(), HashMap::new(), BTreeMap::new())
    }

    #[test]
    fn test_parse_response_array_takes_bracket_span() {
        let raw = "Sure, here you go:\n[{\"id\": \"a\", \"category\": \"Money\"}]\nDone.";
        let parsed = parse_response_array(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["id"], "a");

        assert!(parse_response_array("no array here").is_none());
        assert!(parse_response_array("[{not json}]").is_none());
    }

    #[test]
    fn test_prompt_carries_date_ids_and_categories() {
        let c = empty_categorizer();
        let batch = vec![input("msg_1", "a@b.com", "Hello")];
        let prompt = build_prompt(&c.all_category_names(), &batch);
        assert!(prompt.starts_with("Today is "));
        assert!(prompt.contains("EMAIL_ID: msg_1"));
        assert!(prompt.contains("Immigration"));
        assert!(prompt.contains("Return ONLY a JSON array"));
    }

    #[tokio::test]
    async fn test_chunk_falls_back_per_email_on_bad_category() {
        // no runner is listening on the configured endpoint, so the whole
        // chunk downgrades to heuristics
        let c = empty_categorizer();
        let inputs = vec![
            input("a", "alerts@chase.com", ""),
            input("b", "nobody@example.com", "plain"),
        ];
        let results = extract_batch(&reqwest::Client::new(), &c, &inputs, None).await;
        assert_eq!(results.len(), 2);
        let a = &results["a"];
        assert_eq!(a.category, "Money");
        assert!(!a.extracted);
        assert!(a.action_items.is_empty());
        let b = &results["b"];
        assert_eq!(b.category, "Other");
    }
}
