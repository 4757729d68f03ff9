use thiserror::Error;

/// The top-level ACM error taxonomy.
///
/// Component crates (`acm-store`, `acm-evidence`, `acm-compliance`,
/// `acm-rotation`, `acm-acvs`) each define a narrower error enum for their
/// own operations and convert into this one at their public boundary, so a
/// caller holding only `acm-core` can match on taxonomy without depending
/// on every component crate.
#[derive(Debug, Error)]
pub enum AcmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage corruption detected: {0}")]
    Corruption(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external collaborator error: {0}")]
    External(String),

    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    #[error("acvs unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("migration failed: {0}")]
    Migration(String),
}

impl AcmError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        AcmError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AcmError::NotFound(msg.into())
    }
}
