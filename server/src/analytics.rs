use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::categorizer::{Categorizer, NOISE, OTHER};
use crate::store::StoredEmail;

static RE_SUBSCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)noreply|no-reply|newsletter|notifications?|updates?|donotreply|marketing|digest|news@")
        .unwrap()
});

static RE_DO_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(expires?d?|due|deadline|confirm|verify|action.required|urgent|remind(er)?|renew|pay(ment)?|invoice|sign|complete|submit|required|overdue|appointment|schedule|register|enroll)\b")
        .unwrap()
});

static RE_EMAIL_DOMAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([\w.\-]+)").unwrap());

const SUBSCRIPTION_LABELS: [&str; 3] = [
    "CATEGORY_PROMOTIONS",
    "CATEGORY_SOCIAL",
    "CATEGORY_UPDATES",
];
const REPLY_CATEGORIES: [&str; 2] = ["Personal", "Jobs & Recruitment"];
const DO_CATEGORIES: [&str; 5] = [
    "Immigration",
    "Taxes",
    "Health & Insurance",
    "Security & Accounts",
    "Government & Services",
];
const DOW_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn split_labels(labels: &str) -> impl Iterator<Item = &str> {
    labels.trim_matches('|').split('|').filter(|l| !l.is_empty())
}

fn parse_iso(date_iso: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(date_iso).ok()
}

struct SenderAccumulator {
    count: usize,
    unread_count: usize,
    last_date: String,
    has_unsubscribe: bool,
    labels: HashSet<String>,
    categories: HashMap<String, usize>,
}

impl SenderAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            unread_count: 0,
            last_date: String::new(),
            has_unsubscribe: false,
            labels: HashSet::new(),
            categories: HashMap::new(),
        }
    }

    fn is_subscription(&self, sender: &str) -> bool {
        self.has_unsubscribe
            || RE_SUBSCRIPTION.is_match(sender)
            || self
                .labels
                .iter()
                .any(|l| SUBSCRIPTION_LABELS.contains(&l.as_str()))
            || self.count >= 5
    }
}

fn accumulate_senders(emails: &[StoredEmail]) -> HashMap<String, SenderAccumulator> {
    let mut senders: HashMap<String, SenderAccumulator> = HashMap::new();
    for email in emails {
        if email.sender.is_empty() {
            continue;
        }
        let acc = senders
            .entry(email.sender.clone())
            .or_insert_with(SenderAccumulator::new);
        acc.count += 1;
        if !email.is_read {
            acc.unread_count += 1;
        }
        if email.date_iso > acc.last_date {
            acc.last_date = email.date_iso.clone();
        }
        if !email.list_unsubscribe.is_empty() {
            acc.has_unsubscribe = true;
        }
        for label in split_labels(&email.labels) {
            acc.labels.insert(label.to_string());
        }
        let category = if email.category.is_empty() {
            OTHER
        } else {
            &email.category
        };
        *acc.categories.entry(category.to_string()).or_insert(0) += 1;
    }
    senders
}

pub fn overview(emails: &[StoredEmail], categorizer: &Categorizer) -> Value {
    let mut unread = 0usize;
    let mut starred = 0usize;
    let mut month_counter: BTreeMap<String, usize> = BTreeMap::new();
    let mut cat_counter: HashMap<String, usize> = HashMap::new();

    for email in emails {
        if !email.is_read {
            unread += 1;
        }
        if email.is_starred {
            starred += 1;
        }
        if let Some(dt) = parse_iso(&email.date_iso) {
            *month_counter
                .entry(dt.format("%Y-%m").to_string())
                .or_insert(0) += 1;
        }
        let cat = if email.category.is_empty() {
            OTHER
        } else {
            &email.category
        };
        if cat != NOISE {
            *cat_counter.entry(cat.to_string()).or_insert(0) += 1;
        }
    }

    let senders = accumulate_senders(emails);
    let subscription_count = senders
        .iter()
        .filter(|(sender, acc)| acc.is_subscription(sender))
        .count();

    let mut categories: Vec<Value> = categorizer
        .all_category_names()
        .iter()
        .filter(|cat| cat.as_str() != NOISE)
        .filter_map(|cat| {
            let count = *cat_counter.get(cat.as_str()).unwrap_or(&0);
            (count > 0).then(|| json!({"category": cat, "count": count}))
        })
        .collect();
    categories.sort_by_key(|c| std::cmp::Reverse(c["count"].as_u64().unwrap_or(0)));

    json!({
        "total": emails.len(),
        "unread": unread,
        "starred": starred,
        "subscription_count": subscription_count,
        "monthly_volume": month_counter
            .iter()
            .map(|(period, count)| json!({"period": period, "count": count}))
            .collect::<Vec<_>>(),
        "categories": categories,
    })
}

pub fn sender_analytics(emails: &[StoredEmail], limit: usize) -> Vec<Value> {
    let senders = accumulate_senders(emails);
    let mut results: Vec<Value> = senders
        .iter()
        .map(|(sender, acc)| {
            let top_category = acc
                .categories
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(cat, _)| cat.clone())
                .unwrap_or_else(|| OTHER.to_string());
            json!({
                "sender": sender,
                "count": acc.count,
                "unread_count": acc.unread_count,
                "last_date": acc.last_date,
                "has_list_unsubscribe": acc.has_unsubscribe,
                "is_subscription": acc.is_subscription(sender),
                "category": top_category,
            })
        })
        .collect();
    results.sort_by_key(|s| std::cmp::Reverse(s["count"].as_u64().unwrap_or(0)));
    results.truncate(limit);
    results
}

pub fn count_by_label(emails: &[StoredEmail]) -> Vec<Value> {
    let mut counter: HashMap<String, usize> = HashMap::new();
    for email in emails {
        for label in split_labels(&email.labels) {
            *counter.entry(label.to_string()).or_insert(0) += 1;
        }
    }
    let mut results: Vec<(String, usize)> = counter.into_iter().collect();
    results.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    results
        .into_iter()
        .map(|(label, count)| json!({"label": label, "count": count}))
        .collect()
}

pub fn categories_with_counts(emails: &[StoredEmail], categorizer: &Categorizer) -> Vec<Value> {
    let mut counter: HashMap<&str, usize> = HashMap::new();
    for email in emails {
        let cat = if email.category.is_empty() {
            OTHER
        } else {
            &email.category
        };
        *counter.entry(cat).or_insert(0) += 1;
    }
    let mut results: Vec<Value> = categorizer
        .all_category_names()
        .iter()
        .filter(|cat| cat.as_str() != NOISE)
        .filter_map(|cat| {
            let count = *counter.get(cat.as_str()).unwrap_or(&0);
            (count > 0).then(|| json!({"category": cat, "count": count}))
        })
        .collect();
    results.sort_by_key(|c| std::cmp::Reverse(c["count"].as_u64().unwrap_or(0)));
    results
}

/// Recent emails from the user's pinned alert senders, newest first.
pub fn alerts(emails: &[StoredEmail], pinned_senders: &HashSet<String>) -> Vec<Value> {
    if pinned_senders.is_empty() {
        return vec![];
    }
    let mut results: Vec<&StoredEmail> = emails
        .iter()
        .filter(|e| pinned_senders.contains(&e.sender))
        .collect();
    results.sort_by(|a, b| b.date_iso.cmp(&a.date_iso));
    results
        .into_iter()
        .map(|e| {
            json!({
                "id": e.id,
                "subject": e.subject,
                "sender": e.sender,
                "date": e.date_iso,
                "category": e.category,
                "is_read": e.is_read,
            })
        })
        .collect()
}

/// Bucket the last `days` into reply / do / read queues, 20 each.
pub fn triage(emails: &[StoredEmail], days: i64) -> Value {
    let cutoff = (Utc::now() - Duration::days(days)).timestamp();

    let mut reply: Vec<Value> = Vec::new();
    let mut do_bucket: Vec<Value> = Vec::new();
    let mut read: Vec<Value> = Vec::new();

    let mut recent: Vec<&StoredEmail> = emails
        .iter()
        .filter(|e| e.date_timestamp > 0 && e.date_timestamp >= cutoff)
        .collect();
    recent.sort_by_key(|e| std::cmp::Reverse(e.date_timestamp));

    for email in recent {
        let is_subscription = RE_SUBSCRIPTION.is_match(&email.sender);
        let item = |bucket: &str| {
            json!({
                "id": email.id,
                "subject": email.subject,
                "sender": email.sender,
                "date": email.date_iso,
                "category": email.category,
                "is_read": email.is_read,
                "bucket": bucket,
            })
        };

        if !is_subscription
            && (REPLY_CATEGORIES.contains(&email.category.as_str())
                || email.subject.contains('?'))
        {
            reply.push(item("reply"));
        } else if DO_CATEGORIES.contains(&email.category.as_str())
            || RE_DO_KEYWORDS.is_match(&email.subject)
        {
            do_bucket.push(item("do"));
        } else if !is_subscription && !email.is_read {
            read.push(item("read"));
        }
    }

    reply.truncate(20);
    do_bucket.truncate(20);
    read.truncate(20);
    json!({"reply": reply, "do": do_bucket, "read": read})
}

fn extract_domain(sender: &str) -> Option<String> {
    RE_EMAIL_DOMAIN
        .captures(sender)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

pub fn eda(emails: &[StoredEmail]) -> Value {
    let mut dow_counter = [0usize; 7];
    let mut hour_counter = [0usize; 24];
    let mut heatmap = [[0usize; 24]; 7];
    let mut cat_stats: HashMap<String, (usize, usize, usize, usize)> = HashMap::new();
    let mut month_cat: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
    let mut sender_vol: HashMap<String, usize> = HashMap::new();
    let mut sender_unread: HashMap<String, usize> = HashMap::new();
    let mut domain_counter: HashMap<String, usize> = HashMap::new();
    let mut total_read = 0usize;
    let mut total_starred = 0usize;
    let mut total_attachments = 0usize;

    for email in emails {
        let cat = if email.category.is_empty() {
            OTHER.to_string()
        } else {
            email.category.clone()
        };

        if let Some(dt) = parse_iso(&email.date_iso) {
            let dow = dt.weekday().num_days_from_monday() as usize;
            let hour = dt.hour() as usize;
            dow_counter[dow] += 1;
            hour_counter[hour] += 1;
            heatmap[dow][hour] += 1;
            *month_cat
                .entry(dt.format("%Y-%m").to_string())
                .or_default()
                .entry(cat.clone())
                .or_insert(0) += 1;
        }

        if cat == NOISE {
            continue;
        }

        let stats = cat_stats.entry(cat).or_insert((0, 0, 0, 0));
        stats.0 += 1;
        if email.is_read {
            total_read += 1;
        } else {
            stats.1 += 1;
        }
        if email.is_starred {
            stats.2 += 1;
            total_starred += 1;
        }
        if email.has_attachments {
            stats.3 += 1;
            total_attachments += 1;
        }

        if !email.sender.is_empty() {
            *sender_vol.entry(email.sender.clone()).or_insert(0) += 1;
            if !email.is_read {
                *sender_unread.entry(email.sender.clone()).or_insert(0) += 1;
            }
            if let Some(domain) = extract_domain(&email.sender) {
                *domain_counter.entry(domain).or_insert(0) += 1;
            }
        }
    }

    // last 12 months, top 6 categories by total volume
    let months: Vec<String> = month_cat.keys().rev().take(12).rev().cloned().collect();
    let mut by_volume: Vec<(&String, usize)> =
        cat_stats.iter().map(|(cat, s)| (cat, s.0)).collect();
    by_volume.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let top_cats: Vec<String> = by_volume.iter().take(6).map(|(c, _)| (*c).clone()).collect();
    let monthly_by_category: Vec<Value> = months
        .iter()
        .map(|month| {
            let mut row = serde_json::Map::new();
            row.insert("period".to_string(), json!(month));
            for cat in &top_cats {
                let count = month_cat
                    .get(month)
                    .and_then(|m| m.get(cat))
                    .copied()
                    .unwrap_or(0);
                row.insert(cat.clone(), json!(count));
            }
            Value::Object(row)
        })
        .collect();

    let mut category_stats: Vec<Value> = cat_stats
        .iter()
        .map(|(cat, (count, unread, starred, with_attachments))| {
            let unread_pct = if *count > 0 {
                (*unread as f64 / *count as f64 * 1000.0).round() / 10.0
            } else {
                0.0
            };
            json!({
                "category": cat,
                "count": count,
                "unread": unread,
                "starred": starred,
                "with_attachments": with_attachments,
                "unread_pct": unread_pct,
            })
        })
        .collect();
    category_stats.sort_by_key(|c| std::cmp::Reverse(c["count"].as_u64().unwrap_or(0)));

    let mut top_senders: Vec<(&String, usize)> =
        sender_vol.iter().map(|(s, c)| (s, *c)).collect();
    top_senders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let top_senders: Vec<Value> = top_senders
        .into_iter()
        .take(15)
        .map(|(sender, count)| {
            json!({
                "sender": sender,
                "count": count,
                "unread": sender_unread.get(sender).copied().unwrap_or(0),
            })
        })
        .collect();

    let mut domains: Vec<(String, usize)> = domain_counter.into_iter().collect();
    domains.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let domain_distribution: Vec<Value> = domains
        .into_iter()
        .take(15)
        .map(|(domain, count)| json!({"domain": domain, "count": count}))
        .collect();

    let total = emails.len();
    let pct = |n: usize| {
        if total > 0 {
            (n as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        }
    };

    json!({
        "day_of_week": (0..7)
            .map(|i| json!({"day": DOW_LABELS[i], "count": dow_counter[i]}))
            .collect::<Vec<_>>(),
        "hour_of_day": (0..24)
            .map(|i| json!({"hour": i, "count": hour_counter[i]}))
            .collect::<Vec<_>>(),
        "heatmap": heatmap.iter().map(|row| json!(row.to_vec())).collect::<Vec<_>>(),
        "category_stats": category_stats,
        "top_senders": top_senders,
        "domain_distribution": domain_distribution,
        "monthly_by_category": monthly_by_category,
        "category_trend_keys": top_cats,
        "totals": {
            "unique_senders": sender_vol.len(),
            "read_rate": pct(total_read),
            "attachment_rate": pct(total_attachments),
            "starred_rate": pct(total_starred),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as StdBTreeMap;

    fn email(
        id: &str,
        sender: &str,
        category: &str,
        is_read: bool,
        date_iso: &str,
        ts: i64,
    ) -> StoredEmail {
        StoredEmail {
            id: id.to_string(),
            thread_id: String::new(),
            subject: format!("Subject {id}"),
            sender: sender.to_string(),
            recipients_to: String::new(),
            recipients_cc: String::new(),
            recipients_bcc: String::new(),
            date_iso: date_iso.to_string(),
            date_timestamp: ts,
            snippet: String::new(),
            is_read,
            is_starred: false,
            is_draft: false,
            has_attachments: false,
            labels: "|INBOX|".to_string(),
            history_id: String::new(),
            size_estimate: 0,
            list_unsubscribe: String::new(),
            category: category.to_string(),
            document: String::new(),
            actions_extracted: false,
            action_items_json: "[]".to_string(),
            has_action_items: false,
            spending_json: "{}".to_string(),
            has_transactions: false,
            llm_categorized: false,
        }
    }

    fn categorizer() -> Categorizer {
        Categorizer::with_tables(HashMap::new(), HashMap::new(), StdBTreeMap::new())
    }

    #[test]
    fn test_overview_excludes_noise_category() {
        let emails = vec![
            email("a", "x@a.com", "Money", false, "2024-03-01T10:00:00+00:00", 100),
            email("b", "y@b.com", NOISE, true, "2024-03-02T10:00:00+00:00", 200),
        ];
        let result = overview(&emails, &categorizer());
        assert_eq!(result["total"], 2);
        assert_eq!(result["unread"], 1);
        let cats: Vec<&str> = result["categories"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["category"].as_str().unwrap())
            .collect();
        assert_eq!(cats, vec!["Money"]);
    }

    #[test]
    fn test_sender_analytics_subscription_heuristics() {
        let mut emails: Vec<StoredEmail> = (0..5)
            .map(|i| {
                email(
                    &format!("m{i}"),
                    "busy@sender.com",
                    "Other",
                    true,
                    "2024-03-01T10:00:00+00:00",
                    100,
                )
            })
            .collect();
        emails.push(email(
            "n1",
            "noreply@shop.com",
            "Other",
            true,
            "2024-03-01T10:00:00+00:00",
            100,
        ));
        emails.push(email(
            "p1",
            "friend@gmail.com",
            "Personal",
            false,
            "2024-03-01T10:00:00+00:00",
            100,
        ));

        let results = sender_analytics(&emails, 10);
        let by_sender: HashMap<&str, &Value> = results
            .iter()
            .map(|r| (r["sender"].as_str().unwrap(), r))
            .collect();
        // 5+ emails from one sender counts as a subscription
        assert_eq!(by_sender["busy@sender.com"]["is_subscription"], true);
        // noreply pattern counts as a subscription
        assert_eq!(by_sender["noreply@shop.com"]["is_subscription"], true);
        assert_eq!(by_sender["friend@gmail.com"]["is_subscription"], false);
        // sorted by volume
        assert_eq!(results[0]["sender"], "busy@sender.com");
    }

    #[test]
    fn test_triage_buckets() {
        let now = Utc::now();
        let recent = |hours: i64| (now - Duration::hours(hours)).to_rfc3339();
        let ts = |hours: i64| (now - Duration::hours(hours)).timestamp();

        let mut question = email("q", "friend@x.com", "Other", false, &recent(1), ts(1));
        question.subject = "Lunch tomorrow?".to_string();
        let immigration = email("i", "uscis@gov.com", "Immigration", false, &recent(2), ts(2));
        let unread = email("u", "someone@x.com", "Other", false, &recent(3), ts(3));
        let old = email("o", "old@x.com", "Other", false, "2020-01-01T00:00:00+00:00", 1_577_836_800);

        let result = triage(&[question, immigration, unread, old], 7);
        assert_eq!(result["reply"].as_array().unwrap().len(), 1);
        assert_eq!(result["reply"][0]["id"], "q");
        assert_eq!(result["do"][0]["id"], "i");
        assert_eq!(result["read"][0]["id"], "u");
        // outside the window
        for bucket in ["reply", "do", "read"] {
            assert!(!result[bucket]
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["id"] == "o"));
        }
    }

    #[test]
    fn test_eda_shapes() {
        let emails = vec![
            email("a", "x@a.com", "Money", true, "2024-03-04T09:00:00+00:00", 100),
            email("b", "x@a.com", "Money", false, "2024-03-05T17:00:00+00:00", 200),
        ];
        let result = eda(&emails);
        assert_eq!(result["day_of_week"].as_array().unwrap().len(), 7);
        assert_eq!(result["hour_of_day"].as_array().unwrap().len(), 24);
        assert_eq!(result["heatmap"].as_array().unwrap().len(), 7);
        // 2024-03-04 is a Monday
        assert_eq!(result["day_of_week"][0]["count"], 1);
        assert_eq!(result["totals"]["unique_senders"], 1);
        assert_eq!(result["totals"]["read_rate"], 50.0);
        assert_eq!(result["category_trend_keys"][0], "Money");
    }
}
