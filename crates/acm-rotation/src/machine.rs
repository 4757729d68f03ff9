//! Rotation state machine: `validating → guiding → waiting_for_token →
//! verifying → waiting_deletion → complete`, with `failed`/`cancelled` as
//! terminal sinks reachable from any non-terminal state. Each operation
//! stages a `RotationState` mutation (and, on `confirm_deletion`, an
//! evidence-chain side effect) and commits it in one pass.

use std::collections::HashMap;
use std::sync::Arc;

use acm_acvs::AcvsFacade;
use acm_core::{
    ActionMethod, ActionType, AutomationAction, RotationState, RotationStep, Timestamp,
    ValidationOutcome,
};
use acm_evidence::EvidenceChain;
use acm_store::Store;
use tracing::{error, info, warn};

use crate::adapter::{Instructions, RotationAdapter};
use crate::error::RotationError;

const DEFAULT_STATE_EXPIRY_SECS: i64 = 24 * 3600;
const COMPLETED_RETENTION_SECS: i64 = 7 * 24 * 3600;

#[derive(Clone, Debug)]
pub struct StartRotationRequest {
    pub credential_id: String,
    pub provider: String,
    pub current_token: String,
    pub site: String,
    pub username: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RotationTransition {
    pub state: RotationState,
    pub next_step: RotationStep,
    pub instructions: Option<Instructions>,
}

pub struct RotationMachine {
    store: Arc<Store>,
    adapter: Arc<dyn RotationAdapter>,
    chain: Arc<EvidenceChain>,
    acvs: Option<Arc<AcvsFacade>>,
}

impl RotationMachine {
    pub fn new(
        store: Arc<Store>,
        adapter: Arc<dyn RotationAdapter>,
        chain: Arc<EvidenceChain>,
        acvs: Option<Arc<AcvsFacade>>,
    ) -> Self {
        Self {
            store,
            adapter,
            chain,
            acvs,
        }
    }

    fn load(&self, state_id: &str) -> Result<RotationState, RotationError> {
        self.store
            .get_rotation_state(state_id)?
            .ok_or_else(|| RotationError::NotFound(state_id.to_string()))
    }

    fn persist(&self, state: &RotationState) -> Result<(), RotationError> {
        self.store.put_rotation_state(state)?;
        Ok(())
    }

    /// Step 1 validates the current token via the adapter; step 2 runs
    /// ACVS pre-flight (when enabled) and blocks the rotation outright if
    /// the policy says so. Neither failure persists a `RotationState` row
    /// — `start_rotation` only ever returns a persisted
    /// state on success.
    pub async fn start_rotation(
        &self,
        req: StartRotationRequest,
        now: Timestamp,
    ) -> Result<RotationTransition, RotationError> {
        self.adapter
            .validate(&req.current_token)
            .await
            .map_err(|e| RotationError::Adapter(format!("current token validation failed: {e}")))?;

        let mut crc_id: Option<String> = None;
        if let Some(acvs) = &self.acvs {
            if acvs.is_enabled() {
                let action = AutomationAction {
                    action_type: ActionType::Rotation,
                    method: Some(ActionMethod::Manual),
                    context: HashMap::new(),
                };
                let decision = acvs
                    .validate_action(&req.site, &action, Some(&req.credential_id), false, now)
                    .map_err(|e| RotationError::PolicyBlocked(e.to_string()))?;
                if decision.result == ValidationOutcome::Blocked {
                    return Err(RotationError::PolicyBlocked(format!(
                        "rotation blocked by compliance policy for {}: {}",
                        req.site, decision.reasoning
                    )));
                }
                crc_id = acvs.get_crc(&req.site, now).ok().flatten().map(|c| c.id);
            }
        }

        let mut metadata = HashMap::new();
        if let Some(username) = &req.username {
            metadata.insert("username".to_string(), username.clone());
        }
        metadata.insert("site".to_string(), req.site.clone());
        if let Some(crc_id) = &crc_id {
            metadata.insert("crc_id".to_string(), crc_id.clone());
        }

        let state = RotationState {
            id: acm_crypto::generate_state_id(),
            credential_id: req.credential_id,
            provider: req.provider,
            state: RotationStep::Validating,
            started_at: now,
            updated_at: now,
            expires_at: now + DEFAULT_STATE_EXPIRY_SECS,
            old_token_id: None,
            new_token_id: None,
            metadata,
            error: None,
            completed_at: None,
            cancelled_at: None,
        };
        self.persist(&state)?;
        info!(state_id = %state.id, "rotation started");

        let instructions = self.adapter.guide_create_token(&crate::adapter::CreateTokenRequest {
            scopes: vec![],
            note: format!("rotation for {}", state.credential_id),
            expires_in_secs: None,
        });

        Ok(RotationTransition {
            state,
            next_step: RotationStep::Guiding,
            instructions: Some(instructions),
        })
    }

    /// Requires the state to be in `validating`, `guiding`, or
    /// `waiting_for_token`; on identity mismatch transitions to `failed`
    /// rather than returning an error, since the state itself already
    /// exists and must record why it stopped.
    pub async fn verify_new_token(
        &self,
        state_id: &str,
        new_token: &str,
        now: Timestamp,
    ) -> Result<RotationTransition, RotationError> {
        let mut state = self.load(state_id)?;
        if !matches!(
            state.state,
            RotationStep::Validating | RotationStep::Guiding | RotationStep::WaitingForToken
        ) {
            return Err(RotationError::InvalidTransition(format!(
                "cannot verify_new_token from state {}",
                state.state
            )));
        }
        state.state = RotationStep::Verifying;
        state.updated_at = now;

        let identity = self.adapter.validate(new_token).await;
        let expected_username = state.metadata.get("username").cloned();

        match identity {
            Ok(identity) if expected_username.as_deref().map(|u| u == identity.login).unwrap_or(true) => {
                state.state = RotationStep::WaitingDeletion;
                state.new_token_id = Some(identity.login.clone());
                state.updated_at = now;
                self.persist(&state)?;

                let instructions = self.adapter.guide_delete_token(
                    state.old_token_id.as_deref().unwrap_or("(unknown)"),
                );
                Ok(RotationTransition {
                    state,
                    next_step: RotationStep::WaitingDeletion,
                    instructions: Some(instructions),
                })
            }
            Ok(_) => {
                state.state = RotationStep::Failed;
                state.error = Some("different user".to_string());
                state.updated_at = now;
                self.persist(&state)?;
                Ok(RotationTransition {
                    state,
                    next_step: RotationStep::Failed,
                    instructions: None,
                })
            }
            Err(e) => {
                state.state = RotationStep::Failed;
                state.error = Some(e.to_string());
                state.updated_at = now;
                self.persist(&state)?;
                Ok(RotationTransition {
                    state,
                    next_step: RotationStep::Failed,
                    instructions: None,
                })
            }
        }
    }

    /// On success, appends a rotation evidence entry when ACVS is
    /// enabled; evidence-append failure is logged and degrades audit
    /// coverage rather than failing the confirmation itself.
    pub fn confirm_deletion(&self, state_id: &str, now: Timestamp) -> Result<RotationTransition, RotationError> {
        let mut state = self.load(state_id)?;
        if state.state != RotationStep::WaitingDeletion {
            return Err(RotationError::InvalidTransition(format!(
                "cannot confirm_deletion from state {}",
                state.state
            )));
        }

        state.state = RotationStep::Complete;
        state.completed_at = Some(now);
        state.updated_at = now;
        state.expires_at = now + COMPLETED_RETENTION_SECS;
        self.persist(&state)?;

        if let Some(acvs) = &self.acvs {
            if acvs.is_enabled() {
                let site = state.metadata.get("site").cloned().unwrap_or_default();
                let crc_id = state.metadata.get("crc_id").cloned();
                let duration = now - state.started_at;
                let evidence_data = serde_json::json!({
                    "started_at": state.started_at,
                    "completed_at": now,
                    "duration_secs": duration,
                    "provider": state.provider,
                });
                if let Err(e) = acvs.record_rotation_evidence(
                    &site,
                    &state.credential_id,
                    crc_id,
                    ValidationOutcome::Allowed,
                    evidence_data,
                    now,
                ) {
                    error!(state_id = %state.id, error = %e, "failed to append rotation evidence entry");
                }
            }
        }

        info!(state_id = %state.id, "rotation completed");
        Ok(RotationTransition {
            state,
            next_step: RotationStep::Complete,
            instructions: None,
        })
    }

    /// Idempotent from any non-terminal state; calling it on an already
    /// terminal state is a no-op that returns the state unchanged.
    pub fn cancel_rotation(&self, state_id: &str, now: Timestamp) -> Result<RotationTransition, RotationError> {
        let mut state = self.load(state_id)?;
        if !state.state.is_terminal() {
            state.state = RotationStep::Cancelled;
            state.cancelled_at = Some(now);
            state.updated_at = now;
            self.persist(&state)?;
            info!(state_id = %state.id, "rotation cancelled");
        }
        Ok(RotationTransition {
            state: state.clone(),
            next_step: state.state,
            instructions: None,
        })
    }

    pub fn get_status(&self, state_id: &str) -> Result<RotationState, RotationError> {
        self.load(state_id)
    }

    pub fn list_active(&self) -> Result<Vec<RotationState>, RotationError> {
        Ok(self
            .store
            .list_rotation_states()?
            .into_iter()
            .filter(|s| !s.state.is_terminal())
            .collect())
    }

    /// Transitions any non-terminal state whose `updated_at + dwell_limit`
    /// has passed to `failed{error: "timeout"}`, using `expires_at` as the
    /// hard dwell limit. Returns the count transitioned.
    pub fn timeout_stale(&self, now: Timestamp) -> Result<usize, RotationError> {
        let mut count = 0;
        for mut state in self.store.list_rotation_states()? {
            if !state.state.is_terminal() && state.expires_at < now {
                state.state = RotationStep::Failed;
                state.error = Some("timeout".to_string());
                state.updated_at = now;
                self.persist(&state)?;
                warn!(state_id = %state.id, "rotation timed out");
                count += 1;
            }
        }
        Ok(count)
    }

    /// Removes states whose `expires_at < now`, including terminal states
    /// past their grace-retention window.
    pub fn cleanup_expired(&self, now: Timestamp) -> Result<usize, RotationError> {
        let ids = self.store.expired_rotation_ids(now)?;
        for id in &ids {
            self.store.delete_rotation_state(id)?;
        }
        Ok(ids.len())
    }
}
