//! Shared data-model types for ACM: compliance rules, evidence entries,
//! rotation state, and the legacy audit-event store.
//!
//! These types are persistence-agnostic — `acm-store` maps them onto sled
//! trees, `acm-evidence`/`acm-compliance`/`acm-rotation` own the operations
//! that mutate them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── Compliance rules ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Automation,
    ApiUsage,
    RateLimiting,
    Credentials,
    Bots,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    /// Window duration in whole seconds — the store has no native duration
    /// type, so the API boundary converts to/from `std::time::Duration`.
    pub window_secs: u64,
    pub scope: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Implications {
    pub allows_api_automation: bool,
    pub requires_human_interaction: bool,
    pub mentions_credential_rotation: bool,
    pub rate_limit: Option<RateLimit>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompRule {
    pub id: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub rule_text: String,
    pub extracted_text: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub implications: Implications,
}

// ── Compliance rule set (CRC) ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Allowed,
    AllowedWithApi,
    HimRequired,
    Blocked,
    Uncertain,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceRuleSet {
    pub id: String,
    pub site: String,
    pub tos_url: String,
    pub tos_version: String,
    /// SHA-256 hex of the fetched ToS content.
    pub tos_hash: String,
    pub parsed_at: Timestamp,
    pub expires_at: Timestamp,
    pub rules: Vec<CompRule>,
    pub recommendation: Recommendation,
    pub reasoning: String,
    /// Ed25519 signature (hex) over the canonical CRC message.
    pub signature: String,
    /// Set by the cache on `store`; not part of the signed payload.
    #[serde(default)]
    pub stored_at: Timestamp,
}

/// Identical to `ComplianceRuleSet` — kept as an alias since callers refer
/// to this type as "CRC" throughout.
pub type Crc = ComplianceRuleSet;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrcSummary {
    pub id: String,
    pub site: String,
    pub parsed_at: Timestamp,
    pub expires_at: Timestamp,
    pub recommendation: Recommendation,
    pub rule_count: usize,
    pub expired: bool,
}

// ── Automation action ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Rotation,
    PasswordChange,
    MfaSetup,
    Recovery,
    Export,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMethod {
    Api,
    UiScript,
    Cli,
    Manual,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutomationAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub method: Option<ActionMethod>,
    pub context: HashMap<String, String>,
}

// ── Validation result ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Allowed,
    HimRequired,
    Blocked,
    RateLimited,
    Disabled,
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationOutcome::Allowed => "allowed",
            ValidationOutcome::HimRequired => "him_required",
            ValidationOutcome::Blocked => "blocked",
            ValidationOutcome::RateLimited => "rate_limited",
            ValidationOutcome::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

// ── Evidence entry ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceEventType {
    Validation,
    Rotation,
    HimPrompt,
    CrcUpdate,
    AcvsEnabled,
    AcvsDisabled,
}

impl fmt::Display for EvidenceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceEventType::Validation => "validation",
            EvidenceEventType::Rotation => "rotation",
            EvidenceEventType::HimPrompt => "him_prompt",
            EvidenceEventType::CrcUpdate => "crc_update",
            EvidenceEventType::AcvsEnabled => "acvs_enabled",
            EvidenceEventType::AcvsDisabled => "acvs_disabled",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub id: String,
    pub timestamp: Timestamp,
    pub event_type: EvidenceEventType,
    pub site: String,
    /// SHA-256 hex of the credential id — never the raw id.
    pub credential_id_hash: String,
    pub action: Option<AutomationAction>,
    pub validation_result: ValidationOutcome,
    pub crc_id: Option<String>,
    pub applied_rule_ids: Vec<String>,
    pub evidence_data: serde_json::Value,
    pub previous_entry_id: Option<String>,
    pub chain_hash: String,
    pub signature: String,
}

/// Fields required to append a new entry; the chain fills in `id`,
/// `previous_entry_id`, `chain_hash`, and `signature`.
#[derive(Clone, Debug)]
pub struct EvidenceEntryInput {
    pub timestamp: Timestamp,
    pub event_type: EvidenceEventType,
    pub site: String,
    pub credential_id_hash: String,
    pub action: Option<AutomationAction>,
    pub validation_result: ValidationOutcome,
    pub crc_id: Option<String>,
    pub applied_rule_ids: Vec<String>,
    pub evidence_data: serde_json::Value,
}

/// Export envelope for an external verifier: the entry plus the fingerprint
/// of the public key whose signature it carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub entry: EvidenceEntry,
    pub signer_fingerprint: String,
}

#[derive(Clone, Debug, Default)]
pub struct EvidenceFilter {
    pub credential_id_hash: Option<String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
}

// ── Rotation state ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStep {
    Validating,
    Guiding,
    WaitingForToken,
    Verifying,
    WaitingDeletion,
    Complete,
    Failed,
    Cancelled,
}

impl RotationStep {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RotationStep::Complete | RotationStep::Failed | RotationStep::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RotationStep::Validating => "validating",
            RotationStep::Guiding => "guiding",
            RotationStep::WaitingForToken => "waiting_for_token",
            RotationStep::Verifying => "verifying",
            RotationStep::WaitingDeletion => "waiting_deletion",
            RotationStep::Complete => "complete",
            RotationStep::Failed => "failed",
            RotationStep::Cancelled => "cancelled",
        }
    }

    /// Parses the persisted state string, rejecting unknown values rather
    /// than silently accepting them.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "validating" => RotationStep::Validating,
            "guiding" => RotationStep::Guiding,
            "waiting_for_token" => RotationStep::WaitingForToken,
            "verifying" => RotationStep::Verifying,
            "waiting_deletion" => RotationStep::WaitingDeletion,
            "complete" => RotationStep::Complete,
            "failed" => RotationStep::Failed,
            "cancelled" => RotationStep::Cancelled,
            _ => return None,
        })
    }
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotationState {
    pub id: String,
    pub credential_id: String,
    pub provider: String,
    pub state: RotationStep,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
    pub old_token_id: Option<String>,
    pub new_token_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub error: Option<String>,
    pub completed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
}

// ── Legacy audit event (Phase-I compatibility store) ─────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Rotation,
    Detection,
    Compliance,
    Him,
    Auth,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    Pending,
    Skipped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: u64,
    pub timestamp: Timestamp,
    pub event_type: AuditEventType,
    pub status: AuditStatus,
    /// SHA-256 hex of the credential id.
    pub credential_id: String,
    pub site: Option<String>,
    pub username: Option<String>,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
    pub signature: String,
}
