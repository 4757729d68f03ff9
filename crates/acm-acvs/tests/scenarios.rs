//! End-to-end scenario S1 (successful full rotation with ACVS enabled),
//! scoped to the facade's half of the flow: enabling ACVS, analyzing a
//! site's ToS, validating an action against it, and recording the
//! resulting rotation evidence, then checking the exported chain has
//! exactly the two entries the scenario calls for.
//!
//! `acm-rotation` owns the state-machine half of S1 (see its own
//! `tests/scenarios.rs`); this crate has no dependency on it, so the
//! rotation side effects are recorded directly via
//! `record_rotation_evidence`, same as `RotationMachine::confirm_deletion`
//! does internally.

use std::sync::Arc;
use std::time::Duration;

use acm_acvs::{AcvsFacade, FixtureFetcher, KeywordClassifier, ToSContent};
use acm_core::{
    ActionMethod, ActionType, AutomationAction, EvidenceFilter, UncertainDefault, ValidationOutcome,
};
use acm_crypto::Keypair;
use acm_evidence::EvidenceChain;
use acm_store::{Store, StoreConfig};

fn facade(dir: &tempfile::TempDir) -> (AcvsFacade, Arc<FixtureFetcher>) {
    let store = Arc::new(Store::open(dir.path().join("acm"), StoreConfig::default()).unwrap());
    let keypair = Arc::new(Keypair::generate());
    let chain = Arc::new(EvidenceChain::new(Arc::clone(&store), Arc::clone(&keypair)));
    let fetcher = Arc::new(FixtureFetcher::new());
    let classifier = Arc::new(KeywordClassifier);
    let acvs = AcvsFacade::new(
        store,
        chain,
        keypair,
        fetcher.clone(),
        classifier,
        3600,
        UncertainDefault::HimRequired,
    )
    .unwrap();
    (acvs, fetcher)
}

#[test]
fn full_rotation_leaves_exactly_two_evidence_entries() {
    let dir = tempfile::tempdir().unwrap();
    let (acvs, fetcher) = facade(&dir);
    let now = 1_700_000_000;

    acvs.enable("v1", true, now).unwrap();

    fetcher.seed(
        "example.com",
        ToSContent {
            url: "https://example.com/tos".into(),
            version: "v1".into(),
            body: "You may access your account via our public API. Automated credential rotation is supported.".into(),
        },
    );
    let crc = acvs
        .analyze_tos("example.com", None, true, Duration::from_secs(5), now)
        .unwrap();
    assert!(!crc.id.is_empty());

    let action = AutomationAction {
        action_type: ActionType::Rotation,
        method: Some(ActionMethod::Api),
        context: Default::default(),
    };
    let decision = acvs
        .validate_action("example.com", &action, Some("cred-1"), false, now)
        .unwrap();
    assert_ne!(decision.result, ValidationOutcome::Blocked);
    assert!(decision.evidence_entry_id.is_some());

    // Stand in for `RotationMachine::confirm_deletion`'s terminal-transition
    // evidence append, since this crate has no access to the state machine.
    acvs.record_rotation_evidence(
        "example.com",
        "cred-1",
        Some(crc.id.clone()),
        ValidationOutcome::Allowed,
        serde_json::json!({"step": "confirm_deletion"}),
        now + 120,
    )
    .unwrap();

    let exported = acvs
        .export_evidence_chain(&EvidenceFilter {
            credential_id_hash: Some(acm_crypto::sha256_hex(b"cred-1")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(exported.len(), 2);
}

#[test]
fn blocked_policy_stops_short_of_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let (acvs, fetcher) = facade(&dir);
    let now = 1_700_000_000;

    acvs.enable("v1", true, now).unwrap();
    fetcher.seed(
        "blocked.example",
        ToSContent {
            url: "https://blocked.example/tos".into(),
            version: "v1".into(),
            body: "No automated access is permitted under any circumstance; violations require human review and legal escalation.".into(),
        },
    );
    acvs.analyze_tos("blocked.example", None, true, Duration::from_secs(5), now)
        .unwrap();

    let action = AutomationAction {
        action_type: ActionType::Rotation,
        method: Some(ActionMethod::Api),
        context: Default::default(),
    };
    let decision = acvs
        .validate_action("blocked.example", &action, Some("cred-2"), false, now)
        .unwrap();
    assert_eq!(decision.result, ValidationOutcome::Blocked);

    let exported = acvs
        .export_evidence_chain(&EvidenceFilter {
            credential_id_hash: Some(acm_crypto::sha256_hex(b"cred-2")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].entry.validation_result, ValidationOutcome::Blocked);
}
