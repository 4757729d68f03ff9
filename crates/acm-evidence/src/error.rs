use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("evidence entry not found: {0}")]
    NotFound(String),

    #[error("chain link broken: {0}")]
    BrokenLink(String),

    #[error("could not allocate a unique evidence id: {0}")]
    IdCollision(String),

    #[error("signing/verification failure: {0}")]
    Crypto(String),

    #[error(transparent)]
    Store(#[from] acm_store::StoreError),
}

impl From<ChainError> for acm_core::AcmError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::NotFound(m) => acm_core::AcmError::NotFound(m),
            ChainError::BrokenLink(m) => acm_core::AcmError::Conflict(m),
            ChainError::IdCollision(m) => acm_core::AcmError::Conflict(m),
            ChainError::Crypto(m) => acm_core::AcmError::InvalidInput(m),
            ChainError::Store(e) => e.into(),
        }
    }
}
