//! Evidence chain: an append-only, hash-linked, signed
//! log of validation and rotation events.
//!
//! `add_entry` is serialized through a mutex in front of the store
//! rather than relying on transaction retries — the
//! read-head/compute-hash/insert sequence happens under a single lock
//! so two concurrent adders can never observe the same head and fork
//! the chain.

use std::sync::Arc;

use acm_core::{
    AcmError, EvidenceEntry, EvidenceEntryInput, EvidenceFilter, ExportedEntry, Timestamp,
};
use acm_crypto::{chain_hash_genesis, chain_hash_linked, evidence_canonical_message, generate_evidence_id, generate_id_salt, Keypair, PublicKey};
use acm_store::{Store, StoreError};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::ChainError;

pub struct EvidenceChain {
    store: Arc<Store>,
    keypair: Arc<Keypair>,
    append_lock: Mutex<()>,
}

impl EvidenceChain {
    pub fn new(store: Arc<Store>, keypair: Arc<Keypair>) -> Self {
        Self {
            store,
            keypair,
            append_lock: Mutex::new(()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Appends a new entry, returning its id.
    pub fn add_entry(&self, input: EvidenceEntryInput) -> Result<String, ChainError> {
        let _guard = self.append_lock.lock();

        let head = self.store.get_chain_head()?;
        let previous_entry_id = head.map(|h| h.id);

        // Salted retry: the id is otherwise deterministic over
        // (timestamp, site, credential_id_hash, event_type), so two
        // entries sharing all four within the same UNIX second would
        // otherwise collide and overwrite one another.
        const MAX_ID_ATTEMPTS: u32 = 8;
        let mut salt = String::new();
        let mut id = None;
        for attempt in 0..MAX_ID_ATTEMPTS {
            let candidate = generate_evidence_id(
                input.timestamp,
                &input.site,
                &input.credential_id_hash,
                input.event_type.to_string().as_str(),
                &salt,
            );
            if self.store.get_evidence_entry(&candidate)?.is_none() {
                id = Some(candidate);
                break;
            }
            warn!(attempt, candidate = %candidate, "evidence id collision, retrying with a fresh salt");
            salt = generate_id_salt();
        }
        let id = id.ok_or_else(|| {
            ChainError::IdCollision(format!(
                "no unique evidence id after {MAX_ID_ATTEMPTS} attempts for timestamp {}",
                input.timestamp
            ))
        })?;

        let chain_hash = match &previous_entry_id {
            Some(prev) => chain_hash_linked(&id, prev),
            None => chain_hash_genesis(&id),
        };

        let evidence_data_json = input.evidence_data.to_string();
        let message = evidence_canonical_message(
            &id,
            input.timestamp,
            &input.site,
            &input.credential_id_hash,
            input.event_type.to_string().as_str(),
            input.validation_result.to_string().as_str(),
            input.crc_id.as_deref(),
            &chain_hash,
            &evidence_data_json,
        );
        let signature = self.keypair.sign(&message);

        let entry = EvidenceEntry {
            id: id.clone(),
            timestamp: input.timestamp,
            event_type: input.event_type,
            site: input.site,
            credential_id_hash: input.credential_id_hash,
            action: input.action,
            validation_result: input.validation_result,
            crc_id: input.crc_id,
            applied_rule_ids: input.applied_rule_ids,
            evidence_data: input.evidence_data,
            previous_entry_id,
            chain_hash,
            signature,
        };

        match self.store.insert_evidence_entry(&entry) {
            Ok(()) => {
                info!(id = %entry.id, "evidence entry appended");
                Ok(entry.id)
            }
            Err(StoreError::Conflict(m)) => Err(ChainError::BrokenLink(m)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_entry(&self, id: &str) -> Result<EvidenceEntry, ChainError> {
        self.store
            .get_evidence_entry(id)?
            .ok_or_else(|| ChainError::NotFound(id.to_string()))
    }

    pub fn export(&self, filter: &EvidenceFilter) -> Result<Vec<ExportedEntry>, ChainError> {
        let fingerprint = self.keypair.public_key().fingerprint();
        Ok(self
            .store
            .export_evidence(filter)?
            .into_iter()
            .map(|entry| ExportedEntry {
                entry,
                signer_fingerprint: fingerprint.clone(),
            })
            .collect())
    }

    /// Verifies `entry`'s signature over its canonical message.
    pub fn verify(&self, entry: &EvidenceEntry) -> bool {
        let message = evidence_canonical_message(
            &entry.id,
            entry.timestamp,
            &entry.site,
            &entry.credential_id_hash,
            entry.event_type.to_string().as_str(),
            entry.validation_result.to_string().as_str(),
            entry.crc_id.as_deref(),
            &entry.chain_hash,
            &entry.evidence_data.to_string(),
        );
        self.keypair
            .public_key()
            .verify(&message, &entry.signature)
            .unwrap_or(false)
    }

    /// Streams every entry in timestamp order and accumulates every
    /// integrity violation found, rather than stopping at the first.
    pub fn verify_chain(&self) -> Result<(bool, Vec<String>), ChainError> {
        let entries = self.store.iter_evidence_ordered()?;
        let mut errors = Vec::new();
        let mut previous: Option<&EvidenceEntry> = None;

        for entry in &entries {
            if !self.verify(entry) {
                errors.push(format!("{}: signature verification failed", entry.id));
            }

            let expected_chain_hash = match &entry.previous_entry_id {
                Some(prev) => chain_hash_linked(&entry.id, prev),
                None => chain_hash_genesis(&entry.id),
            };
            if entry.chain_hash != expected_chain_hash {
                errors.push(format!("{}: chain_hash mismatch", entry.id));
            }

            match (previous, &entry.previous_entry_id) {
                (None, None) => {}
                (None, Some(prev)) => {
                    errors.push(format!(
                        "{}: previous_entry_id {} set but entry has no predecessor in scan",
                        entry.id, prev
                    ));
                }
                (Some(_), None) => {
                    errors.push(format!(
                        "{}: previous_entry_id missing but entry is not the genesis entry",
                        entry.id
                    ));
                }
                (Some(prev_entry), Some(prev_id)) => {
                    if &prev_entry.id != prev_id {
                        errors.push(format!(
                            "{}: previous_entry_id {} does not match prior entry {} in scan order",
                            entry.id, prev_id, prev_entry.id
                        ));
                    }
                }
            }

            previous = Some(entry);
        }

        if !errors.is_empty() {
            warn!(count = errors.len(), "evidence chain verification found violations");
        }
        Ok((errors.is_empty(), errors))
    }

    pub fn get_chain_head(&self) -> Result<Option<String>, ChainError> {
        Ok(self.store.get_chain_head()?.map(|e| e.id))
    }

    pub fn get_chain_length(&self) -> u64 {
        self.store.get_chain_length()
    }

    /// Destructive: wipes the entire chain. Callers (the ACVS facade)
    /// must only invoke this on an explicit, non-default opt-out.
    pub fn clear(&self) -> Result<(), AcmError> {
        self.store.clear_evidence()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acm_core::{EvidenceEventType, ValidationOutcome};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn chain() -> (tempfile::TempDir, EvidenceChain) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("acm"), acm_store::StoreConfig::default()).unwrap());
        let keypair = Arc::new(Keypair::generate());
        (dir, EvidenceChain::new(store, keypair))
    }

    fn input(ts: Timestamp, site: &str) -> EvidenceEntryInput {
        EvidenceEntryInput {
            timestamp: ts,
            event_type: EvidenceEventType::Validation,
            site: site.to_string(),
            credential_id_hash: "credhash".into(),
            action: None,
            validation_result: ValidationOutcome::Allowed,
            crc_id: None,
            applied_rule_ids: vec![],
            evidence_data: serde_json::json!({}),
        }
    }

    #[test]
    fn genesis_entry_has_no_previous_and_verifies() {
        let (_dir, chain) = chain();
        let id = chain.add_entry(input(1_000, "example.com")).unwrap();
        let entry = chain.get_entry(&id).unwrap();
        assert!(entry.previous_entry_id.is_none());
        assert!(chain.verify(&entry));
    }

    #[test]
    fn successive_entries_link_by_id() {
        let (_dir, chain) = chain();
        let id1 = chain.add_entry(input(1_000, "example.com")).unwrap();
        let id2 = chain.add_entry(input(2_000, "example.com")).unwrap();
        let entry2 = chain.get_entry(&id2).unwrap();
        assert_eq!(entry2.previous_entry_id, Some(id1));
    }

    #[test]
    fn verify_chain_is_clean_after_several_appends() {
        let (_dir, chain) = chain();
        for i in 0..10 {
            chain.add_entry(input(1_000 + i, "example.com")).unwrap();
        }
        let (ok, errors) = chain.verify_chain().unwrap();
        assert!(ok, "unexpected errors: {errors:?}");
        assert_eq!(chain.get_chain_length(), 10);
    }

    #[test]
    fn tampering_with_a_stored_entry_is_detected() {
        let (_dir, chain) = chain();
        for i in 0..5 {
            chain.add_entry(input(1_000 + i, "example.com")).unwrap();
        }
        let head_id = chain.get_chain_head().unwrap().unwrap();
        let mut tampered = chain.get_entry(&head_id).unwrap();
        tampered.evidence_data = serde_json::json!({"tampered": true});
        // Reach past the chain's own append path to simulate a row edited
        // directly in the store, bypassing the append path entirely.
        chain.store.insert_evidence_entry(&tampered).unwrap();

        let (ok, errors) = chain.verify_chain().unwrap();
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains(&head_id) && e.contains("signature")));
    }

    #[test]
    fn export_includes_signer_fingerprint() {
        let (_dir, chain) = chain();
        chain.add_entry(input(1_000, "example.com")).unwrap();
        let exported = chain.export(&EvidenceFilter::default()).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].signer_fingerprint.len(), 16);
    }

    #[test]
    fn export_filters_by_credential_id_hash() {
        let (_dir, chain) = chain();
        chain.add_entry(input(1_000, "example.com")).unwrap();
        let mut other = input(2_000, "other.example");
        other.credential_id_hash = "other-cred".into();
        chain.add_entry(other).unwrap();

        let filter = EvidenceFilter {
            credential_id_hash: Some("credhash".to_string()),
            ..Default::default()
        };
        let exported = chain.export(&filter).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].entry.credential_id_hash, "credhash");
    }

    #[test]
    fn same_timestamp_entries_still_link_deterministically() {
        let (_dir, chain) = chain();
        let id1 = chain.add_entry(input(5_000, "example.com")).unwrap();
        let id2 = chain.add_entry(input(5_000, "example.com")).unwrap();
        let entry2 = chain.get_entry(&id2).unwrap();
        assert_eq!(entry2.previous_entry_id, Some(id1));
        let (ok, _) = chain.verify_chain().unwrap();
        assert!(ok);
    }

    #[test]
    fn colliding_inputs_get_distinct_salted_ids() {
        // Same timestamp, site, credential hash and event type on every
        // call: without salted disambiguation this would collide on the
        // exact id the prior test's name warns about.
        let (_dir, chain) = chain();
        let id1 = chain.add_entry(input(5_000, "example.com")).unwrap();
        let id2 = chain.add_entry(input(5_000, "example.com")).unwrap();
        let id3 = chain.add_entry(input(5_000, "example.com")).unwrap();
        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);

        let (ok, errors) = chain.verify_chain().unwrap();
        assert!(ok, "unexpected errors: {errors:?}");
        assert_eq!(chain.get_chain_length(), 3);
    }

    proptest! {
        // Generalizes `verify_chain_is_clean_after_several_appends`: no
        // matter the order or repetition of timestamps fed through
        // `add_entry`, the append lock prevents forks and every entry's
        // `previous_entry_id` lines up with the one appended before it.
        #[test]
        fn chain_stays_linear_for_any_append_sequence(
            timestamps in prop::collection::vec(0_i64..1_000_000, 1..40)
        ) {
            let (_dir, chain) = chain();
            let mut ids = Vec::with_capacity(timestamps.len());
            for ts in &timestamps {
                ids.push(chain.add_entry(input(*ts, "example.com")).unwrap());
            }

            prop_assert_eq!(chain.get_chain_length(), ids.len() as u64);

            for (i, id) in ids.iter().enumerate() {
                let entry = chain.get_entry(id).unwrap();
                let expected_prev = if i == 0 { None } else { Some(ids[i - 1].clone()) };
                prop_assert_eq!(&entry.previous_entry_id, &expected_prev);
                prop_assert!(chain.verify(&entry));
            }

            let (ok, errors) = chain.verify_chain().unwrap();
            prop_assert!(ok, "chain verification found violations: {:?}", errors);
        }
    }
}
