pub mod canonical;
pub mod hash;
pub mod ids;
pub mod keypair;

pub use canonical::{
    chain_hash_genesis, chain_hash_linked, crc_canonical_message, evidence_canonical_message,
};
pub use hash::{sha256_bytes, sha256_hex};
pub use ids::{generate_crc_id, generate_evidence_id, generate_id_salt, generate_state_id};
pub use keypair::{CryptoError, Keypair, PublicKey};
