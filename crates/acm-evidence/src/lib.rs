pub mod chain;
pub mod error;

pub use chain::EvidenceChain;
pub use error::ChainError;
