use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sensitive-data categories the engine can flag in draft text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Email,
    NationalId,
    PaymentCard,
    Phone,
    CredentialToken,
    SecretMarker,
    Other,
}

/// Ordinal severity derived from the worst finding in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    None,
    Low,
    Medium,
    High,
}

/// One detected instance of a category within the draft.
/// Offsets are byte offsets into the classified text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub category: Category,
    pub start: usize,
    pub end: usize,
    pub tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub findings: Vec<Finding>,
    pub tier: RiskTier,
}

impl ClassificationResult {
    pub fn clean() -> Self {
        ClassificationResult {
            findings: Vec::new(),
            tier: RiskTier::None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Drafts at or below this length skip the matchers entirely.
pub const DEFAULT_MIN_TEXT_LENGTH: usize = 10;

lazy_static! {
    // Ordered matcher table: one entry per category. Patterns scan the
    // whole draft; pre-compiled once like FilterEngine's rule patterns.
    static ref MATCHERS: Vec<(Category, RiskTier, Regex)> = vec![
        (
            Category::Email,
            RiskTier::Medium,
            Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
        ),
        (
            Category::NationalId,
            RiskTier::High,
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
        ),
        (
            Category::PaymentCard,
            RiskTier::High,
            Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{3,4}\b").unwrap(),
        ),
        (
            Category::Phone,
            RiskTier::Low,
            Regex::new(r"\b(?:\+?1[ .-]?)?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b").unwrap(),
        ),
        (
            Category::CredentialToken,
            RiskTier::High,
            Regex::new(
                r"\b(?:(?:sk|pk|rk|ghp|gho|xox[bap])[-_][A-Za-z0-9_-]{16,}|AKIA[0-9A-Z]{16}|eyJ[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,})",
            )
            .unwrap(),
        ),
        (
            Category::SecretMarker,
            RiskTier::Medium,
            Regex::new(r"(?i)\b(?:password|passwd|secret|api[ _-]?key|access[ _-]?token|private[ _-]?key|credentials?)\b\s*[:=]\s*\S+").unwrap(),
        ),
        (
            Category::Other,
            RiskTier::Low,
            Regex::new(r"(?i)\b(?:confidential|internal use only|do not (?:share|distribute|forward)|proprietary)\b").unwrap(),
        ),
    ];
}

/// Pure classifier over the matcher table. Stateless apart from the
/// length threshold; same input always yields the same output.
pub struct DetectionEngine {
    min_text_length: usize,
}

impl Default for DetectionEngine {
    fn default() -> Self {
        DetectionEngine::new(DEFAULT_MIN_TEXT_LENGTH)
    }
}

impl DetectionEngine {
    pub fn new(min_text_length: usize) -> Self {
        DetectionEngine { min_text_length }
    }

    /// Classify a draft. Never errors: malformed or trivially short input
    /// degrades to an empty result.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        if text.trim().chars().count() <= self.min_text_length {
            log::debug!(
                "draft below length threshold ({} chars), skipping matchers",
                text.trim().chars().count()
            );
            return ClassificationResult::clean();
        }

        let mut findings: Vec<Finding> = Vec::new();
        for (category, tier, pattern) in MATCHERS.iter() {
            let mut spans: Vec<(usize, usize)> = pattern
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .collect();
            if spans.is_empty() {
                continue;
            }
            // Overlapping spans from the same category collapse into one
            // finding; overlaps across categories are kept independently.
            spans.sort_unstable();
            let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
            for (start, end) in spans {
                match merged.last_mut() {
                    Some(last) if start <= last.1 => last.1 = last.1.max(end),
                    _ => merged.push((start, end)),
                }
            }
            for (start, end) in merged {
                findings.push(Finding {
                    category: *category,
                    start,
                    end,
                    tier: *tier,
                });
            }
        }

        findings.sort_by_key(|f| (f.start, f.end));
        let tier = findings
            .iter()
            .map(|f| f.tier)
            .max()
            .unwrap_or(RiskTier::None);

        ClassificationResult { findings, tier }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssn_yields_single_high_national_id_finding() {
        let engine = DetectionEngine::default();
        let result = engine.classify("My SSN is 123-45-6789");

        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].category, Category::NationalId);
        assert_eq!(result.findings[0].tier, RiskTier::High);
        assert_eq!(result.tier, RiskTier::High);
        let span = &result.findings[0];
        assert_eq!(&"My SSN is 123-45-6789"[span.start..span.end], "123-45-6789");
    }

    #[test]
    fn short_text_short_circuits_to_clean() {
        let engine = DetectionEngine::default();
        let result = engine.classify("hello");
        assert!(result.is_clean());
        assert_eq!(result.tier, RiskTier::None);

        // Exactly at the threshold still short-circuits, even when the
        // content would otherwise match nothing anyway.
        let result = engine.classify("0123456789");
        assert!(result.is_clean());
    }

    #[test]
    fn classification_is_deterministic() {
        let engine = DetectionEngine::default();
        let text = "reach me at alice@example.com or 555-867-5309 about the card 4111 1111 1111 1111";
        let first = engine.classify(text);
        for _ in 0..5 {
            assert_eq!(engine.classify(text), first);
        }
        assert!(!first.is_clean());
    }

    #[test]
    fn overall_tier_is_max_of_findings() {
        let engine = DetectionEngine::default();
        let result = engine.classify("this document is confidential, contact bob@corp.example please");
        assert!(result.findings.len() >= 2);
        assert_eq!(result.tier, RiskTier::Medium);
    }

    #[test]
    fn distinct_same_category_matches_stay_separate() {
        let engine = DetectionEngine::default();
        let result = engine.classify("cc a@ex.com and also b@ex.com on the thread");
        let emails: Vec<_> = result
            .findings
            .iter()
            .filter(|f| f.category == Category::Email)
            .collect();
        assert_eq!(emails.len(), 2);
    }

    #[test]
    fn cross_category_overlaps_are_kept_independently() {
        let engine = DetectionEngine::default();
        let result = engine.classify("here is the api_key: sk-live_abcdefghij0123456789 for staging");
        let categories: Vec<Category> = result.findings.iter().map(|f| f.category).collect();
        assert!(categories.contains(&Category::SecretMarker));
        assert!(categories.contains(&Category::CredentialToken));
        assert_eq!(result.tier, RiskTier::High);
    }

    #[test]
    fn clean_prose_yields_no_findings() {
        let engine = DetectionEngine::default();
        let result = engine.classify("please summarize the attached quarterly planning notes");
        assert!(result.is_clean());
    }

    #[test]
    fn risk_is_found_anywhere_in_long_text() {
        let engine = DetectionEngine::default();
        let mut text = "lorem ipsum ".repeat(2000);
        text.push_str("and finally my ssn 987-65-4321");
        let result = engine.classify(&text);
        assert_eq!(result.tier, RiskTier::High);
    }

    #[test]
    fn findings_are_ordered_by_span_start() {
        let engine = DetectionEngine::default();
        let result = engine.classify("card 4111-1111-1111-1111 then mail zoe@example.org later");
        let starts: Vec<usize> = result.findings.iter().map(|f| f.start).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
    }
}
