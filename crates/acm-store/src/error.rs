use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage integrity violation: {0}")]
    Corruption(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<StoreError> for acm_core::AcmError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corruption(m) => acm_core::AcmError::Corruption(m),
            StoreError::Migration(m) => acm_core::AcmError::Migration(m),
            StoreError::Conflict(m) => acm_core::AcmError::Conflict(m),
            StoreError::NotFound(m) => acm_core::AcmError::NotFound(m),
            StoreError::InvalidInput(m) => acm_core::AcmError::InvalidInput(m),
            StoreError::Backend(m) | StoreError::Serialization(m) | StoreError::Io(m) => {
                acm_core::AcmError::Corruption(m)
            }
        }
    }
}
