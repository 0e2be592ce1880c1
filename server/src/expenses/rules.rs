use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::categorizer::{Categorizer, EmailSignals};
use crate::embeddings::{Embedder, ENCODE_BATCH_SIZE};
use crate::error::AppResult;
use crate::expenses::extract_expense;
use crate::store::{EmailStore, StoredEmail};
use crate::user_files;
use entity::expense;

const RULES_FILE: &str = "expense_rules.json";
const EXPENSE_DOC_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseRule {
    pub name: String,
    #[serde(default)]
    pub senders: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub match_categories: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub system: bool,
}

fn default_category() -> String {
    "Uncategorized".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpenseRules {
    #[serde(default)]
    pub rules: Vec<ExpenseRule>,
    #[serde(default)]
    pub include_ids: Vec<String>,
}

fn system_rule(name: &str, keywords: &[&str]) -> ExpenseRule {
    ExpenseRule {
        name: name.to_string(),
        senders: vec![],
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        labels: vec![],
        match_categories: vec![],
        category: default_category(),
        system: true,
    }
}

pub fn default_rules() -> ExpenseRules {
    ExpenseRules {
        rules: vec![
            system_rule("Chase Transactions", &["you made a $"]),
            system_rule("Privacy.com", &["was authorized at"]),
            system_rule("Amex Large Purchases", &["large purchase approved"]),
            system_rule("WF Credit Card", &["credit card purchase of"]),
            ExpenseRule {
                name: "Custom Senders".to_string(),
                senders: vec![],
                keywords: vec![],
                labels: vec![],
                match_categories: vec![],
                category: default_category(),
                system: false,
            },
        ],
        include_ids: vec![],
    }
}

pub fn load_rules() -> ExpenseRules {
    user_files::read_json(RULES_FILE).unwrap_or_else(default_rules)
}

pub fn save_rules(rules: &ExpenseRules) -> AppResult<()> {
    user_files::write_json(RULES_FILE, rules)
}

fn labels_contain(label_str: &str, label: &str) -> bool {
    !label_str.is_empty() && label_str.contains(&format!("|{label}|"))
}

pub fn rule_matches(rule: &ExpenseRule, email: &StoredEmail, email_category: &str) -> bool {
    let sender = email.sender.to_lowercase();
    let text = format!("{} {} {}", email.subject, email.snippet, email.document).to_lowercase();

    if rule
        .senders
        .iter()
        .any(|s| sender.contains(&s.to_lowercase()))
    {
        return true;
    }
    if rule
        .keywords
        .iter()
        .any(|k| text.contains(&k.to_lowercase()))
    {
        return true;
    }
    if rule.labels.iter().any(|l| labels_contain(&email.labels, l)) {
        return true;
    }
    if rule
        .match_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(email_category))
    {
        return true;
    }
    false
}

/// Expense row from a matched email, or None when no amount was found.
fn extract_from_email(
    email: &StoredEmail,
    rule_name: &str,
    category: &str,
) -> Option<expense::Model> {
    let text = format!("{}\n{}\n{}", email.subject, email.snippet, email.document);
    let extracted = extract_expense(&text);
    let amount = extracted.amount?;

    Some(expense::Model {
        id: email.id.clone(),
        document: email.document.chars().take(EXPENSE_DOC_CHARS).collect(),
        embedding: None,
        amount,
        currency: extracted.currency.unwrap_or_else(|| "USD".to_string()),
        merchant: extracted.merchant.unwrap_or_default(),
        category: category.to_string(),
        source_sender: email.sender.clone(),
        labels: email.labels.clone(),
        date_iso: email.date_iso.clone(),
        date_timestamp: email.date_timestamp,
        confidence: extracted.confidence,
        rule_name: rule_name.to_string(),
        source: "rule".to_string(),
        source_gmail_id: email.id.clone(),
        thread_id: email.thread_id.clone(),
        subject: email.subject.clone(),
        notes: String::new(),
    })
}

#[derive(Debug, Default, Serialize)]
pub struct ReprocessSummary {
    pub processed: usize,
    pub matched: usize,
    pub extracted: usize,
    pub missing_amount: usize,
    pub matched_samples: Vec<MatchedSample>,
}

#[derive(Debug, Serialize)]
pub struct MatchedSample {
    pub subject: String,
    pub sender: String,
    pub date: String,
}

/// Wipe rule-sourced expenses and rebuild them by scanning every stored
/// email against the rule set; first matching rule wins. Manual overrides
/// are untouched.
pub async fn reprocess(
    store: &EmailStore,
    embedder: Arc<dyn Embedder>,
) -> AppResult<ReprocessSummary> {
    let rules = load_rules();
    let include_ids: HashSet<&String> = rules.include_ids.iter().collect();
    let categorizer = Categorizer::load();

    store.delete_rule_expenses().await?;

    let emails = store.get_all_emails().await?;
    let mut summary = ReprocessSummary {
        processed: emails.len(),
        ..Default::default()
    };
    let mut rows: Vec<expense::Model> = Vec::new();

    for email in &emails {
        if include_ids.contains(&email.id) {
            if let Some(row) = extract_from_email(email, "manual", &default_category()) {
                rows.push(row);
                summary.extracted += 1;
            }
            continue;
        }

        let email_category = if email.category.is_empty() {
            categorizer.categorize(EmailSignals::from_stored(email))
        } else {
            email.category.clone()
        };
        let Some(matched) = rules
            .rules
            .iter()
            .find(|rule| rule_matches(rule, email, &email_category))
        else {
            continue;
        };
        summary.matched += 1;

        match extract_from_email(email, &matched.name, &matched.category) {
            Some(row) => {
                rows.push(row);
                summary.extracted += 1;
            }
            None => {
                summary.missing_amount += 1;
                if summary.matched_samples.len() < 25 {
                    summary.matched_samples.push(MatchedSample {
                        subject: email.subject.clone(),
                        sender: email.sender.clone(),
                        date: email.date_iso.clone(),
                    });
                }
            }
        }
    }

    if !rows.is_empty() {
        let docs: Vec<String> = rows.iter().map(|r| r.document.clone()).collect();
        let embedder = embedder.clone();
        let vectors = tokio::task::spawn_blocking(move || {
            embedder.encode_batch(&docs, ENCODE_BATCH_SIZE)
        })
        .await
        .context("expense embedding task panicked")??;
        for (row, vector) in rows.iter_mut().zip(vectors) {
            row.embedding = Some(crate::store::to_blob(&vector));
        }
        store.upsert_expenses_batch(rows).await?;
    }

    Ok(summary)
}
