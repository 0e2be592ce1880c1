use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppResult;
use crate::user_files;

pub const IMMIGRATION: &str = "Immigration";
pub const TAXES: &str = "Taxes";
pub const HEALTH: &str = "Health & Insurance";
pub const JOBS: &str = "Jobs & Recruitment";
pub const INVESTMENTS: &str = "Investments";
pub const MONEY: &str = "Money";
pub const TRAVEL: &str = "Travel";
pub const SHOPPING: &str = "Shopping & Orders";
pub const AI_TECH: &str = "AI & Tech";
pub const GOVERNMENT: &str = "Government & Services";
pub const SECURITY: &str = "Security & Accounts";
pub const NEWSLETTERS: &str = "Newsletters";
pub const PERSONAL: &str = "Personal";
pub const OTHER: &str = "Other";

/// Sentinel used by analytics to exclude items from counts while still
/// storing them.
pub const NOISE: &str = "NOISE";

pub const ALL_CATEGORIES: [&str; 14] = [
    IMMIGRATION,
    TAXES,
    HEALTH,
    JOBS,
    INVESTMENTS,
    MONEY,
    TRAVEL,
    SHOPPING,
    AI_TECH,
    GOVERNMENT,
    SECURITY,
    NEWSLETTERS,
    PERSONAL,
    OTHER,
];

const SENDER_OVERRIDES_FILE: &str = "sender_categories.json";
const SUBJECT_OVERRIDES_FILE: &str = "subject_categories.json";
const CUSTOM_CATEGORIES_FILE: &str = "custom_categories.json";

struct Rule {
    category: &'static str,
    sender_re: Option<Regex>,
    subject_re: Option<Regex>,
    labels_re: Option<Regex>,
}

fn rule(
    category: &'static str,
    sender: Option<&str>,
    subject: Option<&str>,
    labels: Option<&str>,
) -> Rule {
    // sender/subject match case-insensitively; the labels pattern is matched
    // verbatim against the pipe-bracketed labels string
    Rule {
        category,
        sender_re: sender.map(|p| Regex::new(&format!("(?i){p}")).unwrap()),
        subject_re: subject.map(|p| Regex::new(&format!("(?i){p}")).unwrap()),
        labels_re: labels.map(|p| Regex::new(p).unwrap()),
    }
}

/// Ordered rule table; a rule fires if ANY provided pattern matches and the
/// first match wins. Reordering changes classification on existing corpora.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            IMMIGRATION,
            Some(r"uscis\.gov|dol\.gov|cbp\.dhs\.gov|nvc\.dos\.gov|immigration.*(attorney|law|consult)"),
            Some(r"\buscis\b|i-?485|i-?797|i-?140|i-?765|i-?131|green card|\bopt\b|h-?1b|employment authorization|labor certif|visa (status|application|approval|interview)|priority date|\bperm\b|national visa center"),
            Some(r"\|Immigration\|"),
        ),
        rule(
            TAXES,
            Some(r"irs\.gov|turbotax\.com|hrblock\.com|taxact\.com|freetaxusa\.com|taxslayer\.com"),
            Some(r"w-?2\b|1099-?\w*|\btaxe?s?\b.*(return|refund|document|form|filing|season|software|prep)|\birs\b.*\btax\b|estimated tax payment"),
            None,
        ),
        rule(
            HEALTH,
            Some(r"cigna|aetna|bluecross|bcbs|anthem|unitedhealthcare|optum|cvs\.com|cvshealth|walgreens\.com|riteaid|kaiser|humana|express.?scripts|quest.?diagnostics|labcorp|mychart|healthequity|hsabank"),
            Some(r"health insurance|medical (claim|bill|statement)|dental (plan|coverage|claim)|prescription|pharmacy (order|ship)|eob|explanation of benefit|deductible|copay|health (plan|coverage)|appointment (reminder|confirmation)|lab result|\bhsa\b|\bfsa\b"),
            None,
        ),
        rule(
            JOBS,
            Some(r"linkedin\.com.*(job|career|alert)|glassdoor\.com|indeed\.com|dice\.com|ziprecruiter|greenhouse\.io|lever\.co|lensa\.ai|hired\.com|jobvite"),
            Some(r"job alert|new jobs? matching|we.re hiring|open position|career opport|job application (received|submitted)|interview (invitation|request|scheduled)|apply.*role|your application to|new jobs? for you"),
            Some(r"\|Jobs\|"),
        ),
        rule(
            INVESTMENTS,
            Some(r"robinhood\.com|fidelity\.com|vanguard\.com|schwab\.com|etrade\.com|tdameritrade|webull|coinbase|binance|zerodha|groww\.in|upstox\.com|kuvera|smallcase|coin.?switch"),
            Some(r"portfolio (update|statement|summary)|dividend (payment|received)|stock (alert|activity)|trade (confirmation|executed)|investment (statement|summary)|brokerage statement|capital (gain|loss)|mutual fund|sip (investment|confirmation)"),
            Some(r"\|Robinhood\||\|Indian Investments\|"),
        ),
        rule(
            MONEY,
            Some(r"wellsfargo|chase\.com|bankofamerica|citibank|sofi\.com|nerdwallet|americanexpress|amex\.com|paypal|venmo|zelle|capitalone\.com|ally\.com|discover\.com|synchrony"),
            Some(r"bank (statement|alert|notification)|account (balance|statement|alert)|credit card (statement|payment|alert)|transaction (alert|notification)|wire transfer|ach (transfer|payment)|overdraft|credit score|loan (payment|statement)|mortgage (payment|statement)|rent (reminder|payment|receipt|invoice)|lease (renewal|agreement|expir)"),
            Some(r"\|Expenses/|\|Payments\||Label_1855894895900833747|Label_4999382456449891088|Label_5867791300677796251|Label_9052786769120093422"),
        ),
        rule(
            TRAVEL,
            Some(r"delta\.com|united\.com|southwest\.com|americanair|alaskaair|jetblue|lufthansa|emirates|airbnb\.com|vrbo|hotels\.com|booking\.com|expedia|kayak|hopper|travelocity|priceline|hertz|enterprise.*rent|avis\.com|tripadvisor"),
            Some(r"flight (confirmation|itinerary|check-in|booking|receipt)|hotel (confirmation|booking|reservation)|boarding pass|check-in (open|reminder)|trip (confirmation|summary|itinerary)|car rental confirmation|your (flight|booking|reservation) (confirm|itinerary)"),
            None,
        ),
        rule(
            SHOPPING,
            Some(r"amazon\.com|ebay\.com|target\.com|walmart\.com|kohls|costco|bestbuy|newegg\.com|etsy\.com|wayfair|overstock|nordstrom|macys|oldnavy|hm\.com|zara\.com|uniqlo|nike\.com|adidas|sunglass.hut|chewy\.com|doordash|ubereats|grubhub|instacart|postmates|hellofresh"),
            Some(r"order (confirm|shipped|delivered|dispatch|receip|placed)|your (order|shipment|package|delivery).*confirm|has (shipped|been delivered)|delivery (confirm|notification|update)|tracking (number|update)|package (delivered|out for delivery)|(thank you|thanks) for (your order|your purchase)|receipt for your (order|purchase)|purchase confirm|invoice #\d"),
            None,
        ),
        rule(
            AI_TECH,
            Some(r"openai\.com|chatgpt|anthropic|deepmind|huggingface|tldr\.tech|tldrnewsletter|bytebytego|alphasignal|therundown\.ai|bensbites|techcrunch|theverge|ycombinator"),
            Some(r"\bai\b.*(news|weekly|digest|roundup|update|newsletter|brief|research)|machine learning|deep learning|\bllm\b|neural network|tech (news|digest|weekly|newsletter)|developer (digest|weekly)|engineering (digest|weekly)"),
            Some(r"\|ML News\|"),
        ),
        rule(
            GOVERNMENT,
            Some(r"usps\.com|informeddelivery|\.gov\b|ssa\.gov|medicare\.gov"),
            Some(r"informed delivery|mail.*arriving|social security|medicare|medicaid|jury (duty|summons)|passport (renewal|application)|dmv (renewal|appointment)"),
            None,
        ),
        rule(
            SECURITY,
            None,
            Some(r"verify (your|the) (email|account|identity|phone|number)|password (reset|changed|recovery|update|expir)|login (attempt|alert|from new device)|security (alert|code|verification|warning)|two.?factor authentication|\b2fa\b|authentication code|sign.?in (attempt|alert)|unusual (activity|sign.?in)|account (locked|suspended|compromised|verification)|suspicious (activity|login|access)"),
            None,
        ),
        rule(
            NEWSLETTERS,
            Some(r"newsletter|substack\.com|coursera\.org|udemy\.com|edx\.org|pluralsight|skillshare|udacity|khanacademy|masterclass|duolingo|brilliant\.org|twitch\.tv|netflix\.com|spotify\.com|hulu\.com|disneyplus|hbomax|peacock|primevideo|steam|epicgames|playstation|xbox|nintendo|discord\.com|linkedin\.com|facebook\.com|twitter\.com|x\.com|instagram\.com|nextdoor\.com|reddit\.com|pinterest|tiktok|snapchat"),
            Some(r"(weekly|daily|monthly) (digest|newsletter|roundup|brief|edition)|issue #\d|vol\.?\s*\d+|course (enroll|complet|certif|progress|purchased)|certificate (earned|available)|learning (path|progress)|new (episode|season|release)|game (pass|available)|commented on your|replied to your|mentioned you|tagged you in|new follower|new connection|\d+% off|buy one get|(flash|lightning|daily) (sale|deal)|exclusive (offer|deal|discount)|limited time offer|clearance sale"),
            Some(r"\|Online Courses\||\|Twitch\||\|CATEGORY_SOCIAL\||\|CATEGORY_PROMOTIONS\|"),
        ),
        rule(PERSONAL, None, None, Some(r"\|CATEGORY_PERSONAL\|")),
    ]
});

/// The signal fields classification reads from an email record.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailSignals<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub labels: &'a str,
    pub list_unsubscribe: &'a str,
}

impl<'a> EmailSignals<'a> {
    pub fn from_stored(email: &'a crate::store::StoredEmail) -> Self {
        Self {
            sender: &email.sender,
            subject: &email.subject,
            labels: &email.labels,
            list_unsubscribe: &email.list_unsubscribe,
        }
    }
}

/// Rule classifier plus the user's override tables. Overrides are exact
/// matches and beat every rule; an unsubscribe header catches anything the
/// rules missed.
pub struct Categorizer {
    sender_overrides: HashMap<String, String>,
    subject_overrides: HashMap<String, String>,
    custom_categories: BTreeMap<String, String>,
}

impl Categorizer {
    pub fn load() -> Self {
        Self {
            sender_overrides: user_files::read_json_or_default(SENDER_OVERRIDES_FILE),
            subject_overrides: user_files::read_json_or_default(SUBJECT_OVERRIDES_FILE),
            custom_categories: user_files::read_json_or_default(CUSTOM_CATEGORIES_FILE),
        }
    }

    pub fn with_tables(
        sender_overrides: HashMap<String, String>,
        subject_overrides: HashMap<String, String>,
        custom_categories: BTreeMap<String, String>,
    ) -> Self {
        Self {
            sender_overrides,
            subject_overrides,
            custom_categories,
        }
    }

    pub fn all_category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = ALL_CATEGORIES.iter().map(|c| c.to_string()).collect();
        for custom in self.custom_categories.keys() {
            if !names.iter().any(|n| n == custom) {
                names.push(custom.clone());
            }
        }
        names
    }

    pub fn is_known_category(&self, name: &str) -> bool {
        ALL_CATEGORIES.contains(&name) || self.custom_categories.contains_key(name)
    }

    pub fn custom_categories(&self) -> &BTreeMap<String, String> {
        &self.custom_categories
    }

    pub fn sender_overrides(&self) -> &HashMap<String, String> {
        &self.sender_overrides
    }

    pub fn categorize(&self, signals: EmailSignals<'_>) -> String {
        if let Some(cat) = self.sender_overrides.get(signals.sender) {
            if self.is_known_category(cat) {
                return cat.clone();
            }
        }
        if let Some(cat) = self.subject_overrides.get(signals.subject) {
            if self.is_known_category(cat) {
                return cat.clone();
            }
        }

        for rule in RULES.iter() {
            if let Some(re) = &rule.sender_re {
                if re.is_match(signals.sender) {
                    return rule.category.to_string();
                }
            }
            if let Some(re) = &rule.subject_re {
                if re.is_match(signals.subject) {
                    return rule.category.to_string();
                }
            }
            if let Some(re) = &rule.labels_re {
                if re.is_match(signals.labels) {
                    return rule.category.to_string();
                }
            }
        }

        // unsubscribe header without a more specific category
        if !signals.list_unsubscribe.is_empty() {
            return NEWSLETTERS.to_string();
        }

        OTHER.to_string()
    }
}

pub fn set_sender_override(sender: &str, category: &str) -> AppResult<()> {
    let mut overrides: HashMap<String, String> =
        user_files::read_json_or_default(SENDER_OVERRIDES_FILE);
    overrides.insert(sender.to_string(), category.to_string());
    user_files::write_json(SENDER_OVERRIDES_FILE, &overrides)
}

pub fn set_subject_override(subject: &str, category: &str) -> AppResult<()> {
    let mut overrides: HashMap<String, String> =
        user_files::read_json_or_default(SUBJECT_OVERRIDES_FILE);
    overrides.insert(subject.to_string(), category.to_string());
    user_files::write_json(SUBJECT_OVERRIDES_FILE, &overrides)
}

pub fn save_custom_categories(categories: &BTreeMap<String, String>) -> AppResult<()> {
    user_files::write_json(CUSTOM_CATEGORIES_FILE, categories)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(categorizer: &Categorizer, sender: &str, subject: &str) -> String {
        categorizer.categorize(EmailSignals {
            sender,
            subject,
            labels: "",
            list_unsubscribe: "",
        })
    }

    fn empty() -> Categorizer {
        Categorizer::with_tables(HashMap::new(), HashMap::new(), BTreeMap::new())
    }

    #[test]
    fn test_rule_table_spot_checks() {
        let c = empty();
        assert_eq!(plain(&c, "noreply@uscis.gov", "Case update"), IMMIGRATION);
        assert_eq!(plain(&c, "news@turbotax.com", "hi"), TAXES);
        assert_eq!(plain(&c, "", "Your W-2 is ready"), TAXES);
        assert_eq!(plain(&c, "claims@cigna.com", ""), HEALTH);
        assert_eq!(plain(&c, "jobs-noreply@linkedin.com", "new job alert"), JOBS);
        assert_eq!(plain(&c, "alerts@robinhood.com", ""), INVESTMENTS);
        assert_eq!(plain(&c, "no.reply.alerts@chase.com", ""), MONEY);
        assert_eq!(plain(&c, "delta@delta.com", ""), TRAVEL);
        assert_eq!(
            plain(&c, "ship-confirm@amazon.com", "Your order has shipped"),
            SHOPPING
        );
        assert_eq!(plain(&c, "digest@tldrnewsletter.com", ""), AI_TECH);
        assert_eq!(plain(&c, "usps@informeddelivery.usps.com", ""), GOVERNMENT);
        assert_eq!(plain(&c, "", "Verify your email address"), SECURITY);
        assert_eq!(plain(&c, "team@substack.com", ""), NEWSLETTERS);
    }

    #[test]
    fn test_first_match_wins_order() {
        let c = empty();
        // linkedin job-alert sender hits Jobs before the Newsletters social rule
        assert_eq!(
            plain(&c, "jobalerts-noreply@linkedin.com", "new jobs for you"),
            JOBS
        );
    }

    #[test]
    fn test_labels_regex_is_case_sensitive_and_exact() {
        let c = empty();
        let cat = c.categorize(EmailSignals {
            sender: "",
            subject: "",
            labels: "|Jobs|",
            list_unsubscribe: "",
        });
        assert_eq!(cat, JOBS);
        let cat = c.categorize(EmailSignals {
            sender: "",
            subject: "",
            labels: "|jobs|",
            list_unsubscribe: "",
        });
        assert_eq!(cat, OTHER);
    }

    #[test]
    fn test_unsubscribe_fallback() {
        let c = empty();
        let cat = c.categorize(EmailSignals {
            sender: "someone@example.com",
            subject: "plain subject",
            labels: "",
            list_unsubscribe: "<mailto:unsub@example.com>",
        });
        assert_eq!(cat, NEWSLETTERS);
    }

    #[test]
    fn test_override_precedence() {
        // sender override beats the Immigration rule
        let c = Categorizer::with_tables(
            HashMap::from([("billing@uscis.gov".to_string(), TAXES.to_string())]),
            HashMap::from([("Your USCIS case".to_string(), PERSONAL.to_string())]),
            BTreeMap::new(),
        );
        assert_eq!(plain(&c, "billing@uscis.gov", "Your USCIS case"), TAXES);
        // subject override fires when no sender override matches
        assert_eq!(plain(&c, "other@example.com", "Your USCIS case"), PERSONAL);
    }

    #[test]
    fn test_unknown_override_target_is_ignored() {
        let c = Categorizer::with_tables(
            HashMap::from([("a@b.com".to_string(), "Deleted Custom".to_string())]),
            HashMap::new(),
            BTreeMap::new(),
        );
        assert_eq!(plain(&c, "a@b.com", "hello"), OTHER);
    }

    #[test]
    fn test_category_totality() {
        let c = Categorizer::with_tables(
            HashMap::new(),
            HashMap::new(),
            BTreeMap::from([("Side Projects".to_string(), "#ff0000".to_string())]),
        );
        let names = c.all_category_names();
        let samples = [
            ("noreply@uscis.gov", "case"),
            ("random@nowhere.dev", "random subject"),
            ("news@turbotax.com", ""),
            ("", ""),
        ];
        for (sender, subject) in samples {
            let cat = plain(&c, sender, subject);
            assert!(names.contains(&cat) || cat == OTHER);
        }
        assert!(names.contains(&"Side Projects".to_string()));
    }
}
