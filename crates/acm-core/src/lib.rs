pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{AcmConfig, AcvsConfig, BackupConfig, RotationConfig, UncertainDefault, ValidatorConfig};
pub use constants::*;
pub use error::AcmError;
pub use types::*;
