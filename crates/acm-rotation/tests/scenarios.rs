//! End-to-end scenario: a rotation started by one process is resumed by a
//! second process opening the same store path.
//!
//! Scoped to a single rotation state rather than a running node, since
//! this crate has no RPC surface of its own to restart against.

use std::sync::Arc;

use acm_core::RotationStep;
use acm_crypto::Keypair;
use acm_evidence::EvidenceChain;
use acm_rotation::{FineGrainedAdapter, InMemoryTokenBackend, RotationMachine, StartRotationRequest};
use acm_store::{Store, StoreConfig};

fn open_store(path: &std::path::Path) -> Arc<Store> {
    Arc::new(Store::open(path, StoreConfig::default()).unwrap())
}

#[tokio::test]
async fn rotation_state_survives_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("acm");
    let keypair = Arc::new(Keypair::generate());
    let now = 1_700_000_000;

    let state_id = {
        let store = open_store(&db_path);
        let chain = Arc::new(EvidenceChain::new(Arc::clone(&store), Arc::clone(&keypair)));
        let backend = InMemoryTokenBackend::new();
        backend.seed("current-tok", "alice");
        let adapter = Arc::new(FineGrainedAdapter::new("demo-provider", backend));
        let rotation = RotationMachine::new(store, adapter, chain, None);

        let started = rotation
            .start_rotation(
                StartRotationRequest {
                    credential_id: "cred-restart".to_string(),
                    provider: "demo-provider".to_string(),
                    current_token: "current-tok".to_string(),
                    site: "example.com".to_string(),
                    username: Some("alice".to_string()),
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(started.state.state, RotationStep::Validating);
        started.state.id
        // Every Arc<Store> above is dropped at the end of this block,
        // closing the sled db exactly as a process exit would.
    };

    // A fresh "process" reopens the same path from nothing but the id.
    let store = open_store(&db_path);
    let chain = Arc::new(EvidenceChain::new(Arc::clone(&store), Arc::clone(&keypair)));
    let backend = InMemoryTokenBackend::new();
    backend.seed("new-tok", "alice");
    let adapter = Arc::new(FineGrainedAdapter::new("demo-provider", backend));
    let rotation = RotationMachine::new(store, adapter, chain, None);

    let resumed = rotation.get_status(&state_id).unwrap();
    assert_eq!(resumed.id, state_id);
    assert_eq!(resumed.state, RotationStep::Validating);
    assert_eq!(resumed.credential_id, "cred-restart");

    let verified = rotation
        .verify_new_token(&state_id, "new-tok", now + 60)
        .await
        .unwrap();
    assert_eq!(verified.state.state, RotationStep::WaitingDeletion);

    let completed = rotation.confirm_deletion(&state_id, now + 120).unwrap();
    assert_eq!(completed.state.state, RotationStep::Complete);
}
