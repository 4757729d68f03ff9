//! Pluggable ToS-fetch and ToS-classification collaborators. The core
//! treats both as capability interfaces; a real
//! deployment supplies an HTTP-backed fetcher and an NLP-backed
//! classifier out-of-tree. The fixtures here exist for tests and for a
//! local demo run of `acm-node`.

use std::collections::HashMap;
use std::time::Duration;

use acm_core::{CompRule, Recommendation};
use parking_lot::Mutex;

use crate::error::AcvsError;

/// Fetched Terms-of-Service content, prior to hashing or classification.
#[derive(Clone, Debug)]
pub struct ToSContent {
    pub url: String,
    pub version: String,
    pub body: String,
}

/// Fetches ToS content for a site. `tos_url` is the caller's best-known
/// URL (e.g. from a previously cached CRC); implementations are free to
/// derive their own default when `None`.
pub trait ToSFetcher: Send + Sync {
    fn fetch(&self, site: &str, tos_url: Option<&str>, timeout: Duration) -> Result<ToSContent, AcvsError>;
}

/// The output of classifying ToS content into compliance rules.
#[derive(Clone, Debug)]
pub struct ClassifierOutput {
    pub rules: Vec<CompRule>,
    pub recommendation: Recommendation,
    pub reasoning: String,
}

/// Classifies ToS content into a rule set and an overall recommendation.
/// A real implementation is NLP-backed; the core only depends on this
/// trait's contract.
pub trait ToSClassifier: Send + Sync {
    fn classify(&self, site: &str, content: &ToSContent) -> Result<ClassifierOutput, AcvsError>;
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// An in-memory fetcher keyed by site, for tests and local demos. Sites
/// not present in the fixture map fail with `AcvsError::External`, the
/// same category a real HTTP timeout or 404 would surface as.
#[derive(Default)]
pub struct FixtureFetcher {
    content: Mutex<HashMap<String, ToSContent>>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(site: impl Into<String>, content: ToSContent) -> Self {
        let fetcher = Self::new();
        fetcher.seed(site, content);
        fetcher
    }

    pub fn seed(&self, site: impl Into<String>, content: ToSContent) {
        self.content.lock().insert(site.into(), content);
    }
}

impl ToSFetcher for FixtureFetcher {
    fn fetch(&self, site: &str, _tos_url: Option<&str>, _timeout: Duration) -> Result<ToSContent, AcvsError> {
        self.content
            .lock()
            .get(site)
            .cloned()
            .ok_or_else(|| AcvsError::External(format!("no fixture ToS content for site {site}")))
    }
}

/// A trivial keyword-driven classifier for tests and local demos: counts
/// occurrences of a handful of marker phrases and derives a single rule
/// plus an overall recommendation. Not a stand-in for a real NLP
/// classifier — it exists so `analyze_tos` has something to call without
/// an external dependency.
pub struct KeywordClassifier;

impl ToSClassifier for KeywordClassifier {
    fn classify(&self, _site: &str, content: &ToSContent) -> Result<ClassifierOutput, AcvsError> {
        use acm_core::{Implications, RuleCategory, Severity};

        let lower = content.body.to_lowercase();
        let forbids_automation = lower.contains("no automated") || lower.contains("bots are not permitted");
        let allows_api = lower.contains("api") && !forbids_automation;
        let requires_human = lower.contains("human review") || forbids_automation;

        let severity = if forbids_automation {
            Severity::Critical
        } else if requires_human {
            Severity::High
        } else if allows_api {
            Severity::Low
        } else {
            Severity::Medium
        };

        let rule = CompRule {
            id: format!("rule-{}", acm_crypto::sha256_hex(content.body.as_bytes())[..8].to_string()),
            category: RuleCategory::Automation,
            severity,
            rule_text: "derived from keyword scan of ToS body".to_string(),
            extracted_text: content.body.chars().take(280).collect(),
            confidence: 0.75,
            implications: Implications {
                allows_api_automation: allows_api,
                requires_human_interaction: requires_human,
                mentions_credential_rotation: lower.contains("credential") || lower.contains("password"),
                rate_limit: None,
            },
        };

        let recommendation = if forbids_automation {
            Recommendation::Blocked
        } else if requires_human {
            Recommendation::HimRequired
        } else if allows_api {
            Recommendation::AllowedWithApi
        } else {
            Recommendation::Allowed
        };

        Ok(ClassifierOutput {
            rules: vec![rule],
            recommendation,
            reasoning: "keyword-fixture classification".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_fetcher_returns_seeded_content() {
        let fetcher = FixtureFetcher::new();
        fetcher.seed(
            "example.com",
            ToSContent {
                url: "https://example.com/tos".into(),
                version: "v1".into(),
                body: "plain terms".into(),
            },
        );
        let content = fetcher.fetch("example.com", None, Duration::from_secs(1)).unwrap();
        assert_eq!(content.version, "v1");
    }

    #[test]
    fn fixture_fetcher_fails_for_unknown_site() {
        let fetcher = FixtureFetcher::new();
        assert!(fetcher.fetch("unknown.example", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn keyword_classifier_blocks_on_no_automated_access() {
        let content = ToSContent {
            url: "https://x.example/tos".into(),
            version: "v1".into(),
            body: "No automated access is permitted under any circumstance.".into(),
        };
        let out = KeywordClassifier.classify("x.example", &content).unwrap();
        assert_eq!(out.recommendation, Recommendation::Blocked);
    }

    #[test]
    fn keyword_classifier_allows_with_api_when_api_mentioned() {
        let content = ToSContent {
            url: "https://x.example/tos".into(),
            version: "v1".into(),
            body: "You may access your account via our public API.".into(),
        };
        let out = KeywordClassifier.classify("x.example", &content).unwrap();
        assert_eq!(out.recommendation, Recommendation::AllowedWithApi);
    }
}
