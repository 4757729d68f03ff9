use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

impl From<CryptoError> for acm_core::AcmError {
    fn from(e: CryptoError) -> Self {
        acm_core::AcmError::InvalidInput(e.to_string())
    }
}

/// An Ed25519 keypair used to sign evidence-chain entries and CRC summaries.
///
/// The secret key bytes are zeroized on drop.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair using a cryptographically strong RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore a keypair from a 32-byte secret key seed (e.g. loaded from
    /// `{config_dir}/keys/evidence.priv`).
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyMaterial("expected 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&arr),
        })
    }

    /// Raw secret key bytes, zeroized by the caller when no longer needed.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    /// Sign `message`, returning the signature as lowercase hex.
    pub fn sign(&self, message: &[u8]) -> String {
        let sig: Signature = self.signing_key.sign(message);
        hex::encode(sig.to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair {{ public_key: {:?} }}", self.public_key())
    }
}

/// An Ed25519 public key, distributable to verifiers alongside evidence
/// exports.
#[derive(Clone, Copy)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&arr)
            .map(PublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Verify a hex-encoded signature over `message`.
    pub fn verify(&self, message: &[u8], signature_hex: &str) -> Result<bool, CryptoError> {
        let sig_bytes = hex::decode(signature_hex)
            .map_err(|e| CryptoError::InvalidSignatureEncoding(e.to_string()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureEncoding("expected 64 bytes".into()))?;
        let sig = Signature::from_bytes(&sig_arr);
        Ok(self.0.verify(message, &sig).is_ok())
    }

    /// A short fingerprint used in evidence export envelopes: the first 16
    /// hex characters of `SHA-256(public_key_bytes)`.
    pub fn fingerprint(self) -> String {
        crate::hash::sha256_hex(&self.to_bytes())[..16].to_string()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"hello world");
        assert!(kp.public_key().verify(b"hello world", &sig).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"hello world");
        assert!(!kp.public_key().verify(b"goodbye world", &sig).unwrap());
    }

    #[test]
    fn from_secret_bytes_round_trips() {
        let kp = Keypair::generate();
        let secret = kp.secret_bytes();
        let restored = Keypair::from_secret_bytes(&*secret).unwrap();
        assert_eq!(kp.public_key().to_bytes(), restored.public_key().to_bytes());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let kp = Keypair::generate();
        let fp1 = kp.public_key().fingerprint();
        let fp2 = kp.public_key().fingerprint();
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 16);
    }
}
