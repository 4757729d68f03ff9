mod error;
mod facade;
mod tos;

pub use error::AcvsError;
pub use facade::{AcvsFacade, AcvsStats, AcvsStatus, ValidationResult};
pub use tos::{ClassifierOutput, FixtureFetcher, KeywordClassifier, ToSClassifier, ToSContent, ToSFetcher};
