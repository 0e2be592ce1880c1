pub mod rules;

use once_cell::sync::Lazy;
use regex::Regex;

// Priority 1: explicit $ prefix, the most reliable shape in USD transaction alerts
static RE_DOLLAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*([0-9]{1,3}(?:,[0-9]{3})*(?:\.[0-9]{2})?)").unwrap());

// Priority 2: INR / Rs / ₹ prefix
static RE_INR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:INR|Rs\.?|₹)\s*([0-9]{1,3}(?:,[0-9]{2,3})*(?:\.[0-9]{2})?)").unwrap()
});

// "more than $X" / "over $X" notification thresholds are not transaction
// amounts; strip them before searching
static RE_THRESHOLD_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:more than|over|greater than|above)\s+\$\s*[0-9]+(?:\.[0-9]{2})?")
        .unwrap()
});

// Priority 3: financial keyword immediately before a bare number
static RE_KEYWORD_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:amount|total|charge(?:d)?|debit(?:ed)?|payment|paid|bill|spend(?:ing)?|due)\s*(?:of|:)?\s*([0-9]{1,3}(?:,[0-9]{3})*(?:\.[0-9]{2})?)",
    )
    .unwrap()
});

static RE_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)spent|purchase|charged|debited|transaction|card|payment").unwrap());

// Merchant extraction, ordered by specificity; the first pattern that hits
// wins. Each pattern captures the name non-greedily and consumes the
// terminator; only group 1 is kept.
static MERCHANT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // WF: "Merchant detail SOME MERCHANT in CITY" / "...SOME MERCHANT View Accounts".
        // Case-sensitive: the WF body has exact "Merchant detail" casing and merchants
        // are ALL CAPS; the terminator is a lowercase "in <CITY>", a comma, a
        // Title-cased word, a newline or end of text.
        Regex::new(r"\bMerchant detail\s+([A-Z][A-Z0-9 *&.'\-]{2,}?)(?:\s+in\b|\s*,|\s+[A-Z][a-z]|\n|$)")
            .unwrap(),
        // Chase: "transaction with [PROC* ]MERCHANT on your card"
        Regex::new(r"(?i)\btransaction with\s+(?:(?:TST|SQ|SQU|PMT)\*\s*)?([A-Za-z0-9][\w &*.'\-]{1,}?)(?:\s+on\b|\s+[-]|\s*\n|\s*$)")
            .unwrap(),
        // Amex: "MERCHANT NAME $XX.XX*" or "MERCHANT NAME INR X,XXX.XX*"
        Regex::new(r"([A-Z][A-Z0-9 &.'\-]{4,}?)\s+(?:\$|INR\s*)[0-9,]+\.[0-9]{2}\*").unwrap(),
        // Privacy.com / generic: "authorized at MERCHANT on your card"
        Regex::new(r"(?i)\b(?:authorized at|purchased at|at)\s+([A-Za-z0-9][\w *&.'\-]{1,}?)(?:\s+on\b|\s*[.,]|\n|$)")
            .unwrap(),
    ]
});

const USD_MAX: f64 = 1_000_000.0;
const INR_MAX: f64 = 10_000_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseMatch {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub merchant: Option<String>,
    pub confidence: f64,
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

pub fn extract_amount(text: &str) -> (Option<f64>, Option<String>) {
    if text.is_empty() {
        return (None, None);
    }

    let text = RE_THRESHOLD_CONTEXT.replace_all(text, "");

    // first $ amount, not the largest; the transaction amount leads in alerts
    for caps in RE_DOLLAR.captures_iter(&text) {
        if let Some(amount) = parse_number(&caps[1]) {
            if amount > 0.0 && amount < USD_MAX {
                return (Some(amount), Some("USD".to_string()));
            }
        }
    }

    for caps in RE_INR.captures_iter(&text) {
        if let Some(amount) = parse_number(&caps[1]) {
            if amount > 0.0 && amount < INR_MAX {
                return (Some(amount), Some("INR".to_string()));
            }
        }
    }

    // keyword-anchored fallback, currency unknown
    if let Some(caps) = RE_KEYWORD_AMOUNT.captures(&text) {
        if let Some(amount) = parse_number(&caps[1]) {
            if amount > 0.0 && amount < USD_MAX {
                return (Some(amount), None);
            }
        }
    }

    (None, None)
}

pub fn extract_merchant(text: &str) -> Option<String> {
    static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

    if text.is_empty() {
        return None;
    }
    for pattern in MERCHANT_PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let merchant = RE_MULTI_SPACE
            .replace_all(caps[1].trim(), " ")
            .into_owned();
        if merchant.len() < 2 {
            return None;
        }
        return Some(merchant.chars().take(80).collect());
    }
    None
}

pub fn extract_expense(text: &str) -> ExpenseMatch {
    let (amount, currency) = extract_amount(text);
    let merchant = extract_merchant(text);

    let mut confidence = 0.0;
    if amount.is_some() {
        confidence += 0.6;
    }
    if RE_KEYWORD.is_match(text) {
        confidence += 0.2;
    }
    if merchant.is_some() {
        confidence += 0.1;
    }

    ExpenseMatch {
        amount,
        currency,
        merchant,
        confidence: (confidence * 100.0_f64).round() / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dollar_amount_takes_first_match() {
        let (amount, currency) =
            extract_amount("You made a $25.99 purchase, your balance is $1,204.77");
        assert_eq!(amount, Some(25.99));
        assert_eq!(currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_threshold_context_is_stripped() {
        let (amount, currency) =
            extract_amount("A purchase of more than $100 was made: NETFLIX $15.49");
        assert_eq!(amount, Some(15.49));
        assert_eq!(currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_inr_amount() {
        let (amount, currency) = extract_amount("debited INR 1,500.00 from your account");
        assert_eq!(amount, Some(1500.0));
        assert_eq!(currency.as_deref(), Some("INR"));

        let (amount, currency) = extract_amount("Rs. 249 deducted");
        assert_eq!(amount, Some(249.0));
        assert_eq!(currency.as_deref(), Some("INR"));
    }

    #[test]
    fn test_keyword_anchored_amount_has_no_currency() {
        let (amount, currency) = extract_amount("Total amount of 45.00 is due");
        assert_eq!(amount, Some(45.0));
        assert_eq!(currency, None);
    }

    #[test]
    fn test_amount_bounds() {
        let (amount, _) = extract_amount("$2,000,000.00 jackpot!");
        assert_eq!(amount, None);
        let (amount, _) = extract_amount("$0 due");
        assert_eq!(amount, None);
    }

    #[test]
    fn test_wells_fargo_merchant() {
        let merchant =
            extract_merchant("Merchant detail STARBUCKS STORE 123 in SEATTLE WA");
        assert_eq!(merchant.as_deref(), Some("STARBUCKS STORE 123"));
    }

    #[test]
    fn test_chase_merchant() {
        let merchant = extract_merchant(
            "You made a transaction with TST* JOE'S DINER on your card ending 1234",
        );
        assert_eq!(merchant.as_deref(), Some("JOE'S DINER"));
    }

    #[test]
    fn test_amex_merchant() {
        let merchant = extract_merchant("NYCT PAYGO $2.90*");
        assert_eq!(merchant.as_deref(), Some("NYCT PAYGO"));
    }

    #[test]
    fn test_generic_authorized_at_merchant() {
        let merchant =
            extract_merchant("Your card was authorized at Netflix.com on your Privacy card");
        assert_eq!(merchant.as_deref(), Some("Netflix.com"));
    }

    #[test]
    fn test_confidence_composition() {
        let m = extract_expense("You made a $25.99 purchase with card at Netflix.com on file");
        assert_eq!(m.amount, Some(25.99));
        assert!(m.merchant.is_some());
        assert!((m.confidence - 0.9).abs() < 1e-9);

        let m = extract_expense("no financial content here");
        assert_eq!(m.amount, None);
        assert_eq!(m.confidence, 0.0);
    }
}
