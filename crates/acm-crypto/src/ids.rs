use rand::RngCore;
use rand_core::OsRng;

use crate::hash::sha256_hex;

/// `CRC-{site}-{first16(tos_hash)}`.
pub fn generate_crc_id(site: &str, tos_hash: &str) -> String {
    let prefix: String = tos_hash.chars().take(16).collect();
    format!("CRC-{site}-{prefix}")
}

/// `EVD-{unix_ts}-{first16(sha256(ts|site|cred_hash|type|salt))}`.
///
/// `salt` is empty on the first attempt so the id stays deterministic for
/// the common case; callers that hit a collision (two entries sharing
/// every other field within the same UNIX second) pass a fresh random
/// salt to disambiguate without changing the id's shape.
pub fn generate_evidence_id(
    unix_ts: i64,
    site: &str,
    credential_id_hash: &str,
    event_type: &str,
    salt: &str,
) -> String {
    let msg = format!("{unix_ts}|{site}|{credential_id_hash}|{event_type}|{salt}");
    let digest = sha256_hex(msg.as_bytes());
    let prefix: String = digest.chars().take(16).collect();
    format!("EVD-{unix_ts}-{prefix}")
}

/// 8 random hex bytes, used to salt a retried [`generate_evidence_id`] call.
pub fn generate_id_salt() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `rot-{16-hex-random}` using a cryptographically strong RNG.
pub fn generate_state_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    format!("rot-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_id_has_expected_shape() {
        let id = generate_crc_id("example.com", &"a".repeat(64));
        assert_eq!(id, format!("CRC-example.com-{}", "a".repeat(16)));
    }

    #[test]
    fn evidence_id_is_deterministic_for_same_inputs() {
        let a = generate_evidence_id(1000, "example.com", "deadbeef", "rotation", "");
        let b = generate_evidence_id(1000, "example.com", "deadbeef", "rotation", "");
        assert_eq!(a, b);
        assert!(a.starts_with("EVD-1000-"));
    }

    #[test]
    fn evidence_id_differs_on_event_type() {
        let a = generate_evidence_id(1000, "example.com", "deadbeef", "rotation", "");
        let b = generate_evidence_id(1000, "example.com", "deadbeef", "validation", "");
        assert_ne!(a, b);
    }

    #[test]
    fn evidence_id_differs_on_salt() {
        let a = generate_evidence_id(1000, "example.com", "deadbeef", "rotation", "");
        let b = generate_evidence_id(1000, "example.com", "deadbeef", "rotation", &generate_id_salt());
        assert_ne!(a, b);
    }

    #[test]
    fn state_id_has_prefix_and_is_random() {
        let a = generate_state_id();
        let b = generate_state_id();
        assert!(a.starts_with("rot-"));
        assert_eq!(a.len(), "rot-".len() + 16);
        assert_ne!(a, b);
    }
}
