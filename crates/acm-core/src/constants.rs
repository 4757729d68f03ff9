//! ─── ACM constants ───────────────────────────────────────────────────────────
//!
//! Defaults for the configuration surface, plus the fixed thresholds
//! baked into the validator and rotation state machine.

// ── CRC cache ────────────────────────────────────────────────────────────────

/// Default CRC cache TTL: 30 days.
pub const DEFAULT_CRC_CACHE_TTL_SECS: i64 = 30 * 24 * 3600;

// ── Validator ────────────────────────────────────────────────────────────────

/// Confidence threshold below which a rule is classified `uncertain`.
/// Strictly-less-than: 0.70 itself does not trigger uncertainty.
pub const UNCERTAIN_CONFIDENCE_THRESHOLD: f32 = 0.70;

// ── Rotation state machine ───────────────────────────────────────────────────

/// Default hard expiry for an in-flight rotation: 24 hours.
pub const DEFAULT_ROTATION_STATE_EXPIRY_SECS: i64 = 24 * 3600;

/// Grace retention window for completed/terminal rotation states: 7 days.
pub const DEFAULT_ROTATION_COMPLETED_RETENTION_SECS: i64 = 7 * 24 * 3600;

// ── Network / adapter timeouts ───────────────────────────────────────────────

/// Default timeout for adapter/ToS network calls.
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;

/// Default HIM prompt response window.
pub const DEFAULT_HIM_RESPONSE_WINDOW_SECS: u64 = 5 * 60;

// ── Backup ───────────────────────────────────────────────────────────────────

/// Default hour-of-day (UTC, 0-23) at which a daily backup is taken.
pub const DEFAULT_BACKUP_DAILY_HOUR: u32 = 2;

/// Default number of days of backups to retain.
pub const DEFAULT_BACKUP_RETENTION_DAYS: u32 = 30;
