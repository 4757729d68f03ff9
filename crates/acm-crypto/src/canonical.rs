//! Canonical message construction. These builders are the single source
//! of truth for the byte
//! sequence fed to `sign`/`verify` — both the Evidence Chain and any
//! external verifier must call the same function to agree on a signature.

/// Canonical message for a CRC: covers `{id, site, tos_hash, parsed_at,
/// recommendation}`.
pub fn crc_canonical_message(
    id: &str,
    site: &str,
    tos_hash: &str,
    parsed_at: i64,
    recommendation: &str,
) -> Vec<u8> {
    format!("{id}|{site}|{tos_hash}|{parsed_at}|{recommendation}").into_bytes()
}

/// Canonical message for an evidence entry: `id|unix_ts|site|cred_hash|
/// event_type|validation_result|crc_id|chain_hash`, with one field
/// appended beyond that literal list: a hash of the entry's
/// `evidence_data` payload. Without it, tampering `evidence_data` directly
/// in the store would still pass signature verification, which defeats
/// tamper detection on anything outside the chain-hash-covered fields.
#[allow(clippy::too_many_arguments)]
pub fn evidence_canonical_message(
    id: &str,
    unix_ts: i64,
    site: &str,
    credential_id_hash: &str,
    event_type: &str,
    validation_result: &str,
    crc_id: Option<&str>,
    chain_hash: &str,
    evidence_data_json: &str,
) -> Vec<u8> {
    let data_hash = crate::hash::sha256_hex(evidence_data_json.as_bytes());
    format!(
        "{id}|{unix_ts}|{site}|{credential_id_hash}|{event_type}|{validation_result}|{}|{chain_hash}|{data_hash}",
        crc_id.unwrap_or(""),
    )
    .into_bytes()
}

/// `chain_hash` for a non-genesis entry: `SHA-256(id || previous_entry_id)`.
pub fn chain_hash_linked(id: &str, previous_entry_id: &str) -> String {
    crate::hash::sha256_hex(format!("{id}{previous_entry_id}").as_bytes())
}

/// `chain_hash` for the genesis entry: `SHA-256(id)`.
pub fn chain_hash_genesis(id: &str) -> String {
    crate::hash::sha256_hex(id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_canonical_message_is_stable_byte_for_byte() {
        let a = evidence_canonical_message(
            "EVD-1-abc",
            1,
            "example.com",
            "hash",
            "rotation",
            "allowed",
            Some("CRC-1"),
            "chainhash",
            "{}",
        );
        let b = evidence_canonical_message(
            "EVD-1-abc",
            1,
            "example.com",
            "hash",
            "rotation",
            "allowed",
            Some("CRC-1"),
            "chainhash",
            "{}",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn evidence_canonical_message_renders_missing_crc_id_as_empty_field() {
        let msg = evidence_canonical_message(
            "EVD-1-abc", 1, "example.com", "hash", "rotation", "allowed", None, "chainhash", "{}",
        );
        let s = String::from_utf8(msg).unwrap();
        let expected_data_hash = crate::hash::sha256_hex(b"{}");
        assert_eq!(
            s,
            format!("EVD-1-abc|1|example.com|hash|rotation|allowed||chainhash|{expected_data_hash}")
        );
    }

    #[test]
    fn evidence_canonical_message_changes_when_evidence_data_changes() {
        let a = evidence_canonical_message(
            "EVD-1-abc", 1, "example.com", "hash", "rotation", "allowed", None, "chainhash", "{}",
        );
        let b = evidence_canonical_message(
            "EVD-1-abc", 1, "example.com", "hash", "rotation", "allowed", None, "chainhash",
            "{\"tampered\":true}",
        );
        assert_ne!(a, b);
    }

    #[test]
    fn genesis_and_linked_chain_hash_differ() {
        let genesis = chain_hash_genesis("EVD-1-abc");
        let linked = chain_hash_linked("EVD-2-def", "EVD-1-abc");
        assert_ne!(genesis, linked);
    }
}
