use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcvsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external collaborator error: {0}")]
    External(String),

    #[error(transparent)]
    Core(#[from] acm_core::AcmError),

    #[error(transparent)]
    Chain(#[from] acm_evidence::ChainError),

    #[error(transparent)]
    Store(#[from] acm_store::StoreError),
}

impl From<AcvsError> for acm_core::AcmError {
    fn from(e: AcvsError) -> Self {
        match e {
            AcvsError::InvalidInput(m) => acm_core::AcmError::InvalidInput(m),
            AcvsError::NotFound(m) => acm_core::AcmError::NotFound(m),
            AcvsError::External(m) => acm_core::AcmError::External(m),
            AcvsError::Core(e) => e,
            AcvsError::Chain(e) => e.into(),
            AcvsError::Store(e) => e.into(),
        }
    }
}
