//! Rotation adapter interface: a pluggable, provider-shaped boundary
//! between the state machine and whatever API a given credential
//! provider exposes, in the same async-trait-object shape used by other
//! pluggable provider interfaces (e.g. consensus/penalty engines).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use acm_core::Timestamp;

use crate::error::RotationError;

#[derive(Clone, Debug)]
pub struct Identity {
    pub login: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterStatus {
    Healthy,
    Degraded(String),
    Unavailable(String),
}

/// Human-facing instructions for a step the adapter cannot automate
/// (e.g. "generate a new token in your account settings").
#[derive(Clone, Debug, Default)]
pub struct Instructions {
    pub title: String,
    pub steps: Vec<String>,
    pub urls: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CreateTokenRequest {
    pub scopes: Vec<String>,
    pub note: String,
    pub expires_in_secs: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct CreatedToken {
    pub id: String,
    pub token: String,
}

#[derive(Clone, Debug)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: Timestamp,
}

/// A credential provider's rotation surface. Every operation beyond
/// `provider_name`/`validate`/`health_check` is optional: providers that
/// can't automate token creation or deletion return
/// `RotationError::Unsupported` and the state machine falls back to
/// `Instructions` for a human to follow.
#[async_trait]
pub trait RotationAdapter: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Resolves `token` to the identity it authenticates as. Used by
    /// `verify_new_token` to confirm the operator didn't paste in a token
    /// belonging to a different account.
    async fn validate(&self, token: &str) -> Result<Identity, RotationError>;

    async fn health_check(&self) -> Result<AdapterStatus, RotationError>;

    /// Guidance shown to the operator for manually creating a replacement
    /// token, scoped the same way `create_token` would be.
    fn guide_create_token(&self, _request: &CreateTokenRequest) -> Instructions {
        Instructions {
            title: format!("Create a new {} token", self.provider_name()),
            steps: vec!["Follow your provider's token-creation flow.".to_string()],
            urls: vec![],
            warnings: vec![],
        }
    }

    /// Guidance shown to the operator for manually deleting the old token.
    fn guide_delete_token(&self, old_token_id: &str) -> Instructions {
        Instructions {
            title: format!("Delete old {} token {old_token_id}", self.provider_name()),
            steps: vec!["Revoke the old token from your provider's settings.".to_string()],
            urls: vec![],
            warnings: vec!["Do this only after confirming the new token works.".to_string()],
        }
    }

    async fn create_token(&self, _request: CreateTokenRequest) -> Result<CreatedToken, RotationError> {
        Err(RotationError::Unsupported(format!(
            "{} does not support automated token creation",
            self.provider_name()
        )))
    }

    async fn delete_token(&self, _token_id: &str) -> Result<(), RotationError> {
        Err(RotationError::Unsupported(format!(
            "{} does not support automated token deletion",
            self.provider_name()
        )))
    }

    async fn get_rate_limit(&self) -> Result<RateLimitStatus, RotationError> {
        Err(RotationError::Unsupported(format!(
            "{} does not expose rate limit status",
            self.provider_name()
        )))
    }

    async fn test_scopes(&self, _token: &str, _scopes: &[String]) -> Result<bool, RotationError> {
        Err(RotationError::Unsupported(format!(
            "{} does not support scope testing",
            self.provider_name()
        )))
    }
}

/// Back-end a [`FineGrainedAdapter`] delegates token CRUD to, kept generic
/// so tests can swap in [`InMemoryTokenBackend`] without any network I/O.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, RotationError>;
    async fn create(&self, request: CreateTokenRequest) -> Result<CreatedToken, RotationError>;
    async fn delete(&self, token_id: &str) -> Result<(), RotationError>;
    async fn health(&self) -> Result<AdapterStatus, RotationError>;
}

/// A reference adapter modeled on fine-grained personal access tokens
/// (scoped, explicitly-named, individually revocable) — the shape most
/// credential providers converge on. Generic over the backend so the same
/// adapter logic serves both a real HTTP client and test fixtures.
pub struct FineGrainedAdapter<B: TokenBackend> {
    provider_name: String,
    backend: B,
}

impl<B: TokenBackend> FineGrainedAdapter<B> {
    pub fn new(provider_name: impl Into<String>, backend: B) -> Self {
        Self {
            provider_name: provider_name.into(),
            backend,
        }
    }
}

#[async_trait]
impl<B: TokenBackend> RotationAdapter for FineGrainedAdapter<B> {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    async fn validate(&self, token: &str) -> Result<Identity, RotationError> {
        self.backend.validate(token).await
    }

    async fn health_check(&self) -> Result<AdapterStatus, RotationError> {
        self.backend.health().await
    }

    fn guide_create_token(&self, _request: &CreateTokenRequest) -> Instructions {
        Instructions {
            title: format!("Create a fine-grained {} token", self.provider_name),
            steps: vec![
                "Open your account's developer settings.".to_string(),
                "Create a new token scoped to only what automation needs.".to_string(),
                "Copy the token value; it is shown only once.".to_string(),
            ],
            urls: vec![],
            warnings: vec!["Never share this token outside the rotation flow.".to_string()],
        }
    }

    fn guide_delete_token(&self, old_token_id: &str) -> Instructions {
        Instructions {
            title: format!("Revoke old {} token {old_token_id}", self.provider_name),
            steps: vec!["Delete the token from your account's developer settings.".to_string()],
            urls: vec![],
            warnings: vec!["Confirm the new token is active before revoking the old one.".to_string()],
        }
    }

    async fn create_token(&self, request: CreateTokenRequest) -> Result<CreatedToken, RotationError> {
        self.backend.create(request).await
    }

    async fn delete_token(&self, token_id: &str) -> Result<(), RotationError> {
        self.backend.delete(token_id).await
    }
}

/// In-memory [`TokenBackend`] for tests and local demo runs of `acm-node`:
/// tokens are opaque strings mapped to a fixed identity, with no real
/// provider call ever made. `by_id` tracks the token value a given
/// `create`-issued id maps to, so `delete` can find it without scanning
/// token values for a substring match.
#[derive(Default)]
pub struct InMemoryTokenBackend {
    by_token: Mutex<HashMap<String, Identity>>,
    by_id: Mutex<HashMap<String, String>>,
    next_id: Mutex<u64>,
}

impl InMemoryTokenBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a token that will validate as belonging to `login`.
    pub fn seed(&self, token: impl Into<String>, login: impl Into<String>) {
        self.by_token.lock().insert(
            token.into(),
            Identity { login: login.into() },
        );
    }
}

#[async_trait]
impl TokenBackend for InMemoryTokenBackend {
    async fn validate(&self, token: &str) -> Result<Identity, RotationError> {
        self.by_token
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| RotationError::Adapter(format!("unknown token {token}")))
    }

    async fn create(&self, request: CreateTokenRequest) -> Result<CreatedToken, RotationError> {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        let id = format!("tok-{next_id}");
        let token = format!("secret-{next_id}-{}", request.note);
        self.by_token.lock().insert(
            token.clone(),
            Identity {
                login: "demo-user".to_string(),
            },
        );
        self.by_id.lock().insert(id.clone(), token.clone());
        Ok(CreatedToken { id, token })
    }

    async fn delete(&self, token_id: &str) -> Result<(), RotationError> {
        let token = self
            .by_id
            .lock()
            .remove(token_id)
            .ok_or_else(|| RotationError::NotFound(token_id.to_string()))?;
        self.by_token.lock().remove(&token);
        Ok(())
    }

    async fn health(&self) -> Result<AdapterStatus, RotationError> {
        Ok(AdapterStatus::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> FineGrainedAdapter<InMemoryTokenBackend> {
        FineGrainedAdapter::new("demo-provider", InMemoryTokenBackend::new())
    }

    #[tokio::test]
    async fn validate_resolves_seeded_token() {
        let adapter = adapter();
        adapter.backend.seed("tok-abc", "alice");
        let identity = adapter.validate("tok-abc").await.unwrap();
        assert_eq!(identity.login, "alice");
    }

    #[tokio::test]
    async fn validate_rejects_unknown_token() {
        let adapter = adapter();
        assert!(adapter.validate("nope").await.is_err());
    }

    #[tokio::test]
    async fn create_then_delete_round_trips() {
        let adapter = adapter();
        let created = adapter
            .create_token(CreateTokenRequest {
                scopes: vec!["repo".to_string()],
                note: "rotation test".to_string(),
                expires_in_secs: None,
            })
            .await
            .unwrap();
        assert!(!created.token.is_empty());
        adapter.delete_token(&created.id).await.unwrap();
    }

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let adapter = adapter();
        assert_eq!(adapter.health_check().await.unwrap(), AdapterStatus::Healthy);
    }

    #[tokio::test]
    async fn unsupported_operations_default_to_unsupported_error() {
        struct BareAdapter;

        #[async_trait]
        impl RotationAdapter for BareAdapter {
            fn provider_name(&self) -> &str {
                "bare"
            }
            async fn validate(&self, _token: &str) -> Result<Identity, RotationError> {
                Ok(Identity { login: "x".into() })
            }
            async fn health_check(&self) -> Result<AdapterStatus, RotationError> {
                Ok(AdapterStatus::Healthy)
            }
        }

        let bare = BareAdapter;
        let err = bare.get_rate_limit().await.unwrap_err();
        assert!(matches!(err, RotationError::Unsupported(_)));
    }
}
