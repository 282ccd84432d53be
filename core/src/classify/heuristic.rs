use regex::Regex;
use tracing::trace;

use super::{ClassificationResult, Tier};

/// One `(category, pattern)` entry of the rule table.
#[derive(Debug, Clone)]
pub struct HeuristicRule {
    category: String,
    pattern: Regex,
}

impl HeuristicRule {
    /// Compiles `pattern` as a regex. Patterns are matched case-insensitively.
    pub fn new(category: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let pattern = if pattern.starts_with("(?i)") {
            Regex::new(pattern)?
        } else {
            Regex::new(&format!("(?i){}", pattern))?
        };
        Ok(HeuristicRule {
            category: category.into(),
            pattern,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

// Keyword lists are wrapped in letter boundaries: "tax" must not match "syntax", while
// "invoice" must still match "invoice_march" (where `\b` would fail on the underscore).
const L: &str = "(?:^|[^a-z])";
const R: &str = "(?:[^a-z]|$)";

fn keywords(words: &str) -> String {
    format!("{L}(?:{words}){R}")
}

/// The built-in table. Order is priority: volume/issue numbering has to win over the
/// generic education words further down.
fn default_table() -> Vec<(&'static str, String)> {
    vec![
        ("Comics", format!(r"{L}(?:vol|volume|issue|chapter|ch)[\s._-]*\d")),
        ("Comics", keywords(r"comics?|manga|manhwa|graphic[\s._-]*novels?")),
        (
            "Finance",
            keywords(
                r"invoices?|receipts?|bank[\s._-]*statements?|statements?|tax(?:es)?|payslips?|budgets?|expenses?|bills?",
            ),
        ),
        ("Legal", keywords(r"contracts?|agreements?|leases?|nda|terms|legal|will|affidavit")),
        (
            "Medical",
            keywords(r"medical|prescriptions?|lab[\s._-]*results?|health|vaccinations?|doctor"),
        ),
        (
            "Travel",
            keywords(r"tickets?|boarding[\s._-]*pass|itinerary|booking|reservation|visa|passport"),
        ),
        (
            "Work",
            keywords(
                r"resume|cv|cover[\s._-]*letter|meeting|minutes|proposal|report|presentation|slides",
            ),
        ),
        (
            "Technical",
            keywords(
                r"manual|datasheet|spec(?:ification)?s?|api|programming|rust|python|javascript|guide|docs?",
            ),
        ),
        ("Research", keywords(r"paper|thesis|dissertation|journal|arxiv|preprint|study")),
        (
            "Education",
            keywords(
                r"textbook|lecture|course|syllabus|homework|exam|notes|tutorial|lesson|workbook",
            ),
        ),
    ]
}

/// Filename-based classifier over an ordered rule table. The first matching rule wins.
///
/// Pure and deterministic: no I/O, and the same input always gives the same answer.
#[derive(Debug, Clone)]
pub struct LocalHeuristicClassifier {
    rules: Vec<HeuristicRule>,
}

impl LocalHeuristicClassifier {
    /// Builds a classifier from `(category, pattern)` pairs, in priority order.
    pub fn from_patterns<I, C, P>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (C, P)>,
        C: Into<String>,
        P: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|(category, pattern)| HeuristicRule::new(category, pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LocalHeuristicClassifier { rules })
    }

    pub fn from_rules(rules: Vec<HeuristicRule>) -> Self {
        LocalHeuristicClassifier { rules }
    }

    pub fn rules(&self) -> &[HeuristicRule] {
        &self.rules
    }

    /// Returns the category of the first rule matching `text`, if any.
    pub fn classify(&self, text: &str) -> Option<&str> {
        let hit = self.rules.iter().find(|rule| rule.matches(text));
        trace!(text, category = hit.map(|r| r.category()), "Heuristic lookup");
        hit.map(HeuristicRule::category)
    }

    /// Like [`classify`](Self::classify), wrapped as a result attributed to `tier`.
    pub fn classify_result(&self, text: &str, tier: Tier) -> Option<ClassificationResult> {
        self.classify(text).map(|category| {
            let source = match tier {
                Tier::Metadata => "title",
                _ => "filename",
            };
            ClassificationResult::new(category, 1.0, format!("{} matched {} rule", source, category), tier)
        })
    }
}

impl Default for LocalHeuristicClassifier {
    fn default() -> Self {
        let rules = default_table()
            .into_iter()
            .filter_map(|(category, pattern)| HeuristicRule::new(category, &pattern).ok())
            .collect();
        LocalHeuristicClassifier { rules }
    }
}
