//! ACVS service facade: orchestrates the CRC cache, the validator, and
//! the evidence chain behind a single enable/disable gate, staging a
//! validation decision and committing it as an optional evidence append.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acm_compliance::{CacheStats, CrcCache, RateTracker, Validator};
use acm_core::{
    ActionMethod, AutomationAction, Crc, CrcSummary, EvidenceEntryInput, EvidenceEventType,
    EvidenceFilter, ExportedEntry, Timestamp, UncertainDefault, ValidationOutcome,
};
use acm_crypto::{crc_canonical_message, generate_crc_id, sha256_hex, Keypair};
use acm_evidence::EvidenceChain;
use acm_store::Store;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AcvsError;
use crate::tos::{ToSClassifier, ToSFetcher};

const META_SETTINGS_KEY: &str = "acvs_settings";
const DEFAULT_TOS_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AcvsSettings {
    enabled: bool,
    eula_version: String,
    enabled_at: Option<Timestamp>,
}

impl Default for AcvsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            eula_version: String::new(),
            enabled_at: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct AcvsStats {
    pub analyses: u64,
    pub validations_allowed: u64,
    pub validations_him_required: u64,
    pub validations_blocked: u64,
    pub validations_rate_limited: u64,
    pub validations_disabled: u64,
    pub crcs_cached: usize,
    pub evidence_entries: u64,
}

#[derive(Clone, Debug)]
pub struct AcvsStatus {
    pub enabled: bool,
    pub eula_version: String,
    pub enabled_at: Option<Timestamp>,
    pub stats: AcvsStats,
}

#[derive(Clone, Debug)]
pub struct ValidationResult {
    pub result: ValidationOutcome,
    pub recommended_method: ActionMethod,
    pub applicable_rule_ids: Vec<String>,
    pub reasoning: String,
    pub evidence_entry_id: Option<String>,
}

pub struct AcvsFacade {
    store: Arc<Store>,
    cache: CrcCache,
    validator: Validator,
    rate_tracker: RateTracker,
    chain: Arc<EvidenceChain>,
    keypair: Arc<Keypair>,
    fetcher: Arc<dyn ToSFetcher>,
    classifier: Arc<dyn ToSClassifier>,
    settings: Mutex<AcvsSettings>,
    analyses: AtomicU64,
}

impl AcvsFacade {
    pub fn new(
        store: Arc<Store>,
        chain: Arc<EvidenceChain>,
        keypair: Arc<Keypair>,
        fetcher: Arc<dyn ToSFetcher>,
        classifier: Arc<dyn ToSClassifier>,
        cache_ttl_secs: i64,
        default_on_uncertain: UncertainDefault,
    ) -> Result<Self, AcvsError> {
        let settings = Self::load_settings(&store)?;
        Ok(Self {
            cache: CrcCache::new(Arc::clone(&store), cache_ttl_secs),
            validator: Validator::new(default_on_uncertain),
            rate_tracker: RateTracker::new(),
            chain,
            keypair,
            fetcher,
            classifier,
            settings: Mutex::new(settings),
            analyses: AtomicU64::new(0),
            store,
        })
    }

    fn load_settings(store: &Store) -> Result<AcvsSettings, AcvsError> {
        match store.get_meta(META_SETTINGS_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AcvsError::InvalidInput(format!("corrupt acvs_settings: {e}"))),
            None => Ok(AcvsSettings::default()),
        }
    }

    fn save_settings(&self, settings: &AcvsSettings) -> Result<(), AcvsError> {
        let bytes = serde_json::to_vec(settings)
            .map_err(|e| AcvsError::InvalidInput(format!("serializing acvs_settings: {e}")))?;
        self.store.put_meta(META_SETTINGS_KEY, &bytes)?;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.lock().enabled
    }

    /// Requires non-empty `eula_version` and explicit `consent`. Idempotent:
    /// calling it again re-records the current EULA version and appends a
    /// fresh `acvs_enabled` evidence entry (each enable is its own
    /// auditable event, not merely a flag flip).
    pub fn enable(&self, eula_version: &str, consent: bool, now: Timestamp) -> Result<(), AcvsError> {
        if !consent {
            return Err(AcvsError::InvalidInput("consent must be true to enable ACVS".into()));
        }
        if eula_version.trim().is_empty() {
            return Err(AcvsError::InvalidInput("eula_version must not be empty".into()));
        }

        let settings = AcvsSettings {
            enabled: true,
            eula_version: eula_version.to_string(),
            enabled_at: Some(now),
        };
        self.save_settings(&settings)?;
        *self.settings.lock() = settings;

        self.chain.add_entry(EvidenceEntryInput {
            timestamp: now,
            event_type: EvidenceEventType::AcvsEnabled,
            site: "*".to_string(),
            credential_id_hash: String::new(),
            action: None,
            validation_result: ValidationOutcome::Allowed,
            crc_id: None,
            applied_rule_ids: vec![],
            evidence_data: serde_json::json!({"eula_version": eula_version}),
        })?;

        info!(eula_version, "ACVS enabled");
        Ok(())
    }

    /// `preserve_evidence=false` destroys the entire evidence chain —
    /// strongly discouraged, and callers must opt in explicitly.
    pub fn disable(&self, clear_cache: bool, preserve_evidence: bool, now: Timestamp) -> Result<(), AcvsError> {
        let settings = AcvsSettings {
            enabled: false,
            eula_version: self.settings.lock().eula_version.clone(),
            enabled_at: None,
        };
        self.save_settings(&settings)?;
        *self.settings.lock() = settings;

        if clear_cache {
            self.cache.clear()?;
        }

        if preserve_evidence {
            self.chain.add_entry(EvidenceEntryInput {
                timestamp: now,
                event_type: EvidenceEventType::AcvsDisabled,
                site: "*".to_string(),
                credential_id_hash: String::new(),
                action: None,
                validation_result: ValidationOutcome::Disabled,
                crc_id: None,
                applied_rule_ids: vec![],
                evidence_data: serde_json::json!({}),
            })?;
        } else {
            self.chain.clear().map_err(|e: acm_core::AcmError| AcvsError::External(e.to_string()))?;
        }

        info!(clear_cache, preserve_evidence, "ACVS disabled");
        Ok(())
    }

    /// Fetches ToS content, classifies it, signs the resulting CRC, and
    /// stores it in the cache — refreshing even a non-expired cached CRC
    /// when `force_refresh` is set.
    pub fn analyze_tos(
        &self,
        site: &str,
        tos_url: Option<&str>,
        force_refresh: bool,
        timeout: Duration,
        now: Timestamp,
    ) -> Result<Crc, AcvsError> {
        if !force_refresh {
            if let Some(existing) = self.cache.get(site, now)? {
                return Ok(existing);
            }
        }

        let content = self.fetcher.fetch(site, tos_url, timeout)?;
        let tos_hash = sha256_hex(content.body.as_bytes());
        let classified = self.classifier.classify(site, &content)?;
        let id = generate_crc_id(site, &tos_hash);

        let message = crc_canonical_message(
            &id,
            site,
            &tos_hash,
            now,
            recommendation_name(classified.recommendation),
        );
        let signature = self.keypair.sign(&message);

        let crc = Crc {
            id,
            site: site.to_string(),
            tos_url: content.url,
            tos_version: content.version,
            tos_hash,
            parsed_at: now,
            expires_at: now, // cache.store() stamps the real TTL-derived expiry
            rules: classified.rules,
            recommendation: classified.recommendation,
            reasoning: classified.reasoning,
            signature,
            stored_at: now,
        };

        let stored = self.cache.store(crc, now)?;
        self.analyses.fetch_add(1, Ordering::Relaxed);
        info!(site, id = %stored.id, "ToS analyzed");
        Ok(stored)
    }

    /// Validates `action` for `site` against the cached (or force-refreshed)
    /// CRC. When `credential_id` is provided and ACVS is enabled, appends a
    /// `validation` evidence entry and returns its id.
    pub fn validate_action(
        &self,
        site: &str,
        action: &AutomationAction,
        credential_id: Option<&str>,
        force_refresh: bool,
        now: Timestamp,
    ) -> Result<ValidationResult, AcvsError> {
        if !self.is_enabled() {
            return Ok(ValidationResult {
                result: ValidationOutcome::Disabled,
                recommended_method: ActionMethod::Manual,
                applicable_rule_ids: vec![],
                reasoning: "ACVS is disabled".to_string(),
                evidence_entry_id: None,
            });
        }

        let crc = if force_refresh {
            Some(self.analyze_tos(site, None, true, Duration::from_secs(DEFAULT_TOS_TIMEOUT_SECS), now)?)
        } else {
            self.cache.get(site, now)?
        };

        let decision = self.validator.validate(crc.as_ref(), action, &self.rate_tracker, site, now);

        let evidence_entry_id = if let Some(cred_id) = credential_id {
            let entry_id = self.chain.add_entry(EvidenceEntryInput {
                timestamp: now,
                event_type: EvidenceEventType::Validation,
                site: site.to_string(),
                credential_id_hash: sha256_hex(cred_id.as_bytes()),
                action: Some(action.clone()),
                validation_result: decision.result,
                crc_id: crc.as_ref().map(|c| c.id.clone()),
                applied_rule_ids: decision.applicable_rule_ids.clone(),
                evidence_data: serde_json::json!({"reasoning": decision.reasoning}),
            })?;
            Some(entry_id)
        } else {
            None
        };

        Ok(ValidationResult {
            result: decision.result,
            recommended_method: decision.recommended_method,
            applicable_rule_ids: decision.applicable_rule_ids,
            reasoning: decision.reasoning,
            evidence_entry_id,
        })
    }

    /// Appends a rotation-lifecycle evidence entry iff ACVS is enabled;
    /// used by the rotation state machine on terminal transitions. Returns
    /// `Ok(None)` (not an error) when ACVS is disabled.
    pub fn record_rotation_evidence(
        &self,
        site: &str,
        credential_id: &str,
        crc_id: Option<String>,
        outcome: ValidationOutcome,
        evidence_data: serde_json::Value,
        now: Timestamp,
    ) -> Result<Option<String>, AcvsError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let id = self.chain.add_entry(EvidenceEntryInput {
            timestamp: now,
            event_type: EvidenceEventType::Rotation,
            site: site.to_string(),
            credential_id_hash: sha256_hex(credential_id.as_bytes()),
            action: None,
            validation_result: outcome,
            crc_id,
            applied_rule_ids: vec![],
            evidence_data,
        })?;
        Ok(Some(id))
    }

    pub fn get_crc(&self, site: &str, now: Timestamp) -> Result<Option<Crc>, AcvsError> {
        Ok(self.cache.get(site, now)?)
    }

    pub fn list_crcs(&self, site_filter: Option<&str>, include_expired: bool, now: Timestamp) -> Result<Vec<CrcSummary>, AcvsError> {
        Ok(self.cache.list(site_filter, include_expired, now)?)
    }

    pub fn invalidate_crc(&self, site: &str) -> Result<usize, AcvsError> {
        Ok(self.cache.invalidate(site)?)
    }

    /// Purges expired CRCs from the cache. Exposed so the operator
    /// binary's maintenance loop doesn't need direct access to the cache.
    pub fn clean_expired_crcs(&self, now: Timestamp) -> Result<usize, AcvsError> {
        Ok(self.cache.clean_expired(now)?)
    }

    pub fn export_evidence_chain(&self, filter: &EvidenceFilter) -> Result<Vec<ExportedEntry>, AcvsError> {
        Ok(self.chain.export(filter)?)
    }

    pub fn get_status(&self, now: Timestamp) -> Result<AcvsStatus, AcvsError> {
        let settings = self.settings.lock().clone();
        let cache_stats: CacheStats = self.cache.get_stats(now)?;

        let mut stats = AcvsStats {
            analyses: self.analyses.load(Ordering::Relaxed),
            crcs_cached: cache_stats.total,
            evidence_entries: self.chain.get_chain_length(),
            ..Default::default()
        };

        for entry in self.chain.export(&EvidenceFilter::default())? {
            if entry.entry.event_type != EvidenceEventType::Validation {
                continue;
            }
            match entry.entry.validation_result {
                ValidationOutcome::Allowed => stats.validations_allowed += 1,
                ValidationOutcome::HimRequired => stats.validations_him_required += 1,
                ValidationOutcome::Blocked => stats.validations_blocked += 1,
                ValidationOutcome::RateLimited => stats.validations_rate_limited += 1,
                ValidationOutcome::Disabled => stats.validations_disabled += 1,
            }
        }

        Ok(AcvsStatus {
            enabled: settings.enabled,
            eula_version: settings.eula_version,
            enabled_at: settings.enabled_at,
            stats,
        })
    }
}

fn recommendation_name(r: acm_core::Recommendation) -> &'static str {
    match r {
        acm_core::Recommendation::Allowed => "allowed",
        acm_core::Recommendation::AllowedWithApi => "allowed_with_api",
        acm_core::Recommendation::HimRequired => "him_required",
        acm_core::Recommendation::Blocked => "blocked",
        acm_core::Recommendation::Uncertain => "uncertain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tos::{FixtureFetcher, KeywordClassifier, ToSContent};
    use acm_core::{ActionType, Recommendation};
    use std::collections::HashMap;

    fn facade() -> (tempfile::TempDir, AcvsFacade, Arc<FixtureFetcher>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("acm"), acm_store::StoreConfig::default()).unwrap());
        let keypair = Arc::new(Keypair::generate());
        let chain = Arc::new(EvidenceChain::new(Arc::clone(&store), Arc::clone(&keypair)));
        let fixture = Arc::new(FixtureFetcher::new());
        let classifier = Arc::new(KeywordClassifier);
        let facade = AcvsFacade::new(
            store,
            chain,
            keypair,
            Arc::clone(&fixture) as Arc<dyn ToSFetcher>,
            classifier,
            3600,
            UncertainDefault::HimRequired,
        )
        .unwrap();
        (dir, facade, fixture)
    }

    fn action() -> AutomationAction {
        AutomationAction {
            action_type: ActionType::Rotation,
            method: None,
            context: HashMap::new(),
        }
    }

    #[test]
    fn enable_requires_consent() {
        let (_dir, facade, _fixture) = facade();
        let err = facade.enable("v1", false, 0).unwrap_err();
        assert!(matches!(err, AcvsError::InvalidInput(_)));
    }

    #[test]
    fn enable_requires_nonempty_eula_version() {
        let (_dir, facade, _fixture) = facade();
        let err = facade.enable("", true, 0).unwrap_err();
        assert!(matches!(err, AcvsError::InvalidInput(_)));
    }

    #[test]
    fn enable_persists_across_reload_and_appends_evidence() {
        let (_dir, facade, _fixture) = facade();
        facade.enable("v1", true, 1_000).unwrap();
        assert!(facade.is_enabled());
        assert_eq!(facade.chain.get_chain_length(), 1);
    }

    #[test]
    fn validate_action_returns_disabled_when_acvs_is_off() {
        let (_dir, facade, _fixture) = facade();
        let result = facade.validate_action("example.com", &action(), None, false, 0).unwrap();
        assert_eq!(result.result, ValidationOutcome::Disabled);
    }

    #[test]
    fn validate_action_appends_evidence_only_with_credential_id() {
        let (_dir, facade, _fixture) = facade();
        facade.enable("v1", true, 0).unwrap();

        facade.validate_action("example.com", &action(), None, false, 100).unwrap();
        assert_eq!(facade.chain.get_chain_length(), 1); // just the acvs_enabled entry

        let result = facade.validate_action("example.com", &action(), Some("cred-1"), false, 200).unwrap();
        assert!(result.evidence_entry_id.is_some());
        assert_eq!(facade.chain.get_chain_length(), 2);
    }

    #[test]
    fn analyze_tos_signs_and_caches_crc() {
        let (_dir, facade, fixture) = facade();
        fixture.seed(
            "blocked.example",
            ToSContent {
                url: "https://blocked.example/tos".into(),
                version: "v1".into(),
                body: "No automated access, bots are not permitted.".into(),
            },
        );
        let crc = facade
            .analyze_tos("blocked.example", None, false, Duration::from_secs(1), 1_000)
            .unwrap();
        assert_eq!(crc.recommendation, Recommendation::Blocked);
        assert!(!crc.signature.is_empty());

        let cached = facade.get_crc("blocked.example", 1_000).unwrap().unwrap();
        assert_eq!(cached.id, crc.id);
    }

    #[test]
    fn blocked_policy_surfaces_as_blocked_result_with_evidence() {
        let (_dir, facade, fixture) = facade();
        facade.enable("v1", true, 0).unwrap();
        fixture.seed(
            "blocked.example",
            ToSContent {
                url: "https://blocked.example/tos".into(),
                version: "v1".into(),
                body: "No automated access, bots are not permitted.".into(),
            },
        );
        facade
            .analyze_tos("blocked.example", None, false, Duration::from_secs(1), 0)
            .unwrap();

        let result = facade
            .validate_action("blocked.example", &action(), Some("cred-2"), false, 100)
            .unwrap();
        assert_eq!(result.result, ValidationOutcome::Blocked);
        assert!(result.evidence_entry_id.is_some());
    }
}
