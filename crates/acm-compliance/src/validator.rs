//! Validator: applies a CRC's rules to a proposed
//! automation action and derives a recommendation and a method.

use std::collections::HashMap;

use acm_core::{
    ActionMethod, ActionType, AutomationAction, Crc, RuleCategory, Severity, Timestamp,
    UncertainDefault, ValidationOutcome,
};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct ValidationDecision {
    pub result: ValidationOutcome,
    pub recommended_method: ActionMethod,
    pub applicable_rule_ids: Vec<String>,
    pub reasoning: String,
}

/// Which rule categories are relevant to each action type.
fn relevant_categories(action_type: ActionType) -> &'static [RuleCategory] {
    use RuleCategory::*;
    match action_type {
        ActionType::Rotation | ActionType::PasswordChange => {
            &[Automation, ApiUsage, Credentials, Bots]
        }
        ActionType::MfaSetup => &[Automation, ApiUsage],
        ActionType::Recovery | ActionType::Export => &[Automation, ApiUsage, Bots],
    }
}

/// The pre-mapping recommendation derived purely from rule flags, before
/// the configurable "uncertain" default is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleVerdict {
    Blocked,
    HimRequired,
    AllowedWithApi,
    Allowed,
    Uncertain,
}

pub struct Validator {
    default_on_uncertain: UncertainDefault,
}

impl Validator {
    pub fn new(default_on_uncertain: UncertainDefault) -> Self {
        Self { default_on_uncertain }
    }

    /// Evaluates `action` against `crc` (if any). `crc = None` means no
    /// compliance rule set is cached for the site — callers decide what
    /// that implies upstream (typically treated the same as an empty
    /// rule set: `uncertain`, classified by the configured default).
    pub fn validate(
        &self,
        crc: Option<&Crc>,
        action: &AutomationAction,
        rate_tracker: &RateTracker,
        site: &str,
        now: Timestamp,
    ) -> ValidationDecision {
        let Some(crc) = crc else {
            return ValidationDecision {
                result: self.default_on_uncertain.to_outcome(),
                recommended_method: ActionMethod::Manual,
                applicable_rule_ids: vec![],
                reasoning: "no compliance rule set cached for site".to_string(),
            };
        };

        let categories = relevant_categories(action.action_type);
        let applicable: Vec<_> = crc
            .rules
            .iter()
            .filter(|r| categories.contains(&r.category))
            .collect();

        if applicable.is_empty() {
            let result = match crc.recommendation {
                acm_core::Recommendation::Allowed | acm_core::Recommendation::AllowedWithApi => {
                    ValidationOutcome::Allowed
                }
                acm_core::Recommendation::HimRequired => ValidationOutcome::HimRequired,
                acm_core::Recommendation::Blocked => ValidationOutcome::Blocked,
                acm_core::Recommendation::Uncertain => self.default_on_uncertain.to_outcome(),
            };
            let method = match crc.recommendation {
                acm_core::Recommendation::AllowedWithApi => ActionMethod::Api,
                acm_core::Recommendation::Allowed => action.method.unwrap_or(ActionMethod::Api),
                _ => ActionMethod::Manual,
            };
            return ValidationDecision {
                result,
                recommended_method: method,
                applicable_rule_ids: vec![],
                reasoning: crc.reasoning.clone(),
            };
        }

        let has_blocking = applicable
            .iter()
            .any(|r| r.severity == Severity::Critical && r.implications.requires_human_interaction);
        let has_him_required = applicable
            .iter()
            .any(|r| r.severity >= Severity::High && r.implications.requires_human_interaction);
        let has_api_allowed = applicable.iter().any(|r| r.implications.allows_api_automation);
        let has_allowed = applicable
            .iter()
            .any(|r| r.severity <= Severity::Medium && !r.implications.requires_human_interaction);
        let has_uncertain = applicable.iter().any(|r| r.confidence < acm_core::UNCERTAIN_CONFIDENCE_THRESHOLD);

        let verdict = if has_blocking {
            RuleVerdict::Blocked
        } else if has_him_required {
            RuleVerdict::HimRequired
        } else if has_api_allowed {
            RuleVerdict::AllowedWithApi
        } else if has_allowed {
            RuleVerdict::Allowed
        } else if has_uncertain {
            RuleVerdict::Uncertain
        } else {
            // No flag fired at all: this combination of rules is novel
            // enough that we don't have a confident read — treat as
            // uncertain rather than silently defaulting to allowed.
            RuleVerdict::Uncertain
        };

        let result = match verdict {
            RuleVerdict::Blocked => ValidationOutcome::Blocked,
            RuleVerdict::HimRequired => ValidationOutcome::HimRequired,
            RuleVerdict::AllowedWithApi | RuleVerdict::Allowed => ValidationOutcome::Allowed,
            RuleVerdict::Uncertain => self.default_on_uncertain.to_outcome(),
        };

        let recommended_method = match verdict {
            RuleVerdict::AllowedWithApi => ActionMethod::Api,
            RuleVerdict::Allowed => action.method.unwrap_or(ActionMethod::Api),
            _ => ActionMethod::Manual,
        };

        let applicable_rule_ids = applicable.iter().map(|r| r.id.clone()).collect();
        let reasoning = format!(
            "{} applicable rule(s) evaluated; verdict={:?}",
            applicable.len(),
            verdict
        );

        let mut decision = ValidationDecision {
            result,
            recommended_method,
            applicable_rule_ids,
            reasoning,
        };

        if let Some(rule) = applicable.iter().find(|r| r.implications.rate_limit.is_some()) {
            let limit = rule.implications.rate_limit.as_ref().unwrap();
            if rate_tracker.check_and_record(site, limit, now) {
                decision.reasoning = format!("rate limit exceeded for {site}; {}", decision.reasoning);
                decision.result = ValidationOutcome::RateLimited;
            }
        }

        decision
    }
}

trait UncertainDefaultExt {
    fn to_outcome(&self) -> ValidationOutcome;
}

impl UncertainDefaultExt for UncertainDefault {
    fn to_outcome(&self) -> ValidationOutcome {
        match self {
            UncertainDefault::Allowed => ValidationOutcome::Allowed,
            UncertainDefault::HimRequired => ValidationOutcome::HimRequired,
            UncertainDefault::Blocked => ValidationOutcome::Blocked,
        }
    }
}

struct RateWindow {
    window_start: Timestamp,
    window_secs: u64,
    count: u32,
}

/// Per-site, process-local, advisory rate tracker — intentionally
/// in-process and non-persistent.
#[derive(Default)]
pub struct RateTracker {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call against `site`'s rolling window and returns whether
    /// this call pushes the count past `limit.requests`.
    pub fn check_and_record(&self, site: &str, limit: &acm_core::RateLimit, now: Timestamp) -> bool {
        let mut windows = self.windows.lock();
        let window = windows.entry(site.to_string()).or_insert_with(|| RateWindow {
            window_start: now,
            window_secs: limit.window_secs,
            count: 0,
        });

        if now >= window.window_start + window.window_secs as Timestamp {
            window.window_start = now;
            window.window_secs = limit.window_secs;
            window.count = 0;
        }

        window.count += 1;
        window.count > limit.requests
    }
}
