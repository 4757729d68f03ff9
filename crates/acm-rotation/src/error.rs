use thiserror::Error;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("rotation state not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("adapter does not support this operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Store(#[from] acm_store::StoreError),

    #[error(transparent)]
    Chain(#[from] acm_evidence::ChainError),
}

impl From<RotationError> for acm_core::AcmError {
    fn from(e: RotationError) -> Self {
        match e {
            RotationError::NotFound(m) => acm_core::AcmError::NotFound(m),
            RotationError::InvalidTransition(m) => acm_core::AcmError::Conflict(m),
            RotationError::PolicyBlocked(m) => acm_core::AcmError::PolicyBlocked(m),
            RotationError::Adapter(m) => acm_core::AcmError::External(m),
            RotationError::Unsupported(m) => acm_core::AcmError::Unsupported(m),
            RotationError::Store(e) => e.into(),
            RotationError::Chain(e) => e.into(),
        }
    }
}
