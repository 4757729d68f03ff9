mod adapter;
mod error;
mod machine;

pub use adapter::{
    AdapterStatus, CreateTokenRequest, CreatedToken, FineGrainedAdapter, Identity,
    InMemoryTokenBackend, Instructions, RateLimitStatus, RotationAdapter, TokenBackend,
};
pub use error::RotationError;
pub use machine::{RotationMachine, RotationTransition, StartRotationRequest};
