//! Transactional, indexed persistent store.
//!
//! Backed by `sled` — a pure-Rust embedded database with its own
//! write-ahead log and crash-safe sync. Multi-row atomicity is provided
//! by `sled`'s multi-tree `Transactional` API standing in for
//! `begin_tx`/`commit`/`rollback`; referential integrity is enforced
//! as application code run inside that same transaction.
//!
//! Named trees:
//!   crcs                 — CRC id          → bincode(ComplianceRuleSet)
//!   crc_by_site          — site\0ts\0id     → crc id            (secondary index)
//!   evidence_entries     — entry id        → bincode(EvidenceEntry)
//!   evidence_by_ts       — ts\0id           → entry id           (chain order / head)
//!   evidence_by_cred_ts  — cred\0ts\0id     → entry id           (export filter)
//!   audit_events         — be(event_id)     → bincode(AuditEvent)
//!   audit_by_ts          — ts\0event_id     → event_id
//!   rotation_states      — state id        → bincode(RotationState)
//!   rotation_by_expiry   — expires_at\0id   → state id           (cleanup scan)
//!   schema_version       — be(version)      → checksum (see migrations.rs)
//!   meta                 — utf8 key         → raw bytes

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use acm_core::{AuditEvent, Crc, CrcSummary, EvidenceEntry, EvidenceFilter, RotationState, Timestamp};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::migrations;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Flush interval in milliseconds; `None` disables the background
    /// flusher (sled still flushes on drop and on `flush()`).
    pub flush_every_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_every_ms: Some(200),
        }
    }
}

pub struct Store {
    db: Db,
    path: PathBuf,
    crcs: Tree,
    crc_by_site: Tree,
    evidence_entries: Tree,
    evidence_by_ts: Tree,
    evidence_by_cred_ts: Tree,
    audit_events: Tree,
    audit_by_ts: Tree,
    rotation_states: Tree,
    rotation_by_expiry: Tree,
    meta: Tree,
}

// ── Key encoding helpers ──────────────────────────────────────────────────────

fn be_ts(ts: Timestamp) -> [u8; 8] {
    ts.to_be_bytes()
}

fn crc_site_key(site: &str, parsed_at: Timestamp, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(site.len() + 1 + 8 + id.len());
    k.extend_from_slice(site.as_bytes());
    k.push(0);
    k.extend_from_slice(&be_ts(parsed_at));
    k.extend_from_slice(id.as_bytes());
    k
}

fn evidence_ts_key(ts: Timestamp, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(8 + id.len());
    k.extend_from_slice(&be_ts(ts));
    k.extend_from_slice(id.as_bytes());
    k
}

fn evidence_cred_key(cred_hash: &str, ts: Timestamp, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(cred_hash.len() + 1 + 8 + id.len());
    k.extend_from_slice(cred_hash.as_bytes());
    k.push(0);
    k.extend_from_slice(&be_ts(ts));
    k.extend_from_slice(id.as_bytes());
    k
}

fn rotation_expiry_key(expires_at: Timestamp, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(8 + id.len());
    k.extend_from_slice(&be_ts(expires_at));
    k.extend_from_slice(id.as_bytes());
    k
}

fn audit_ts_key(ts: Timestamp, event_id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(16);
    k.extend_from_slice(&be_ts(ts));
    k.extend_from_slice(&event_id.to_be_bytes());
    k
}

// ── Store ─────────────────────────────────────────────────────────────────────

impl Store {
    /// Opens (or creates) the store at `path`, applying all pending
    /// migrations and running an integrity check.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))?;

        let mut sled_config = sled::Config::new().path(&path);
        if let Some(ms) = config.flush_every_ms {
            sled_config = sled_config.flush_every_ms(Some(ms as u64));
        }
        let db = sled_config.open()?;

        // Back up the on-disk tree before mutating it, but only when this
        // is a pre-existing store with migrations actually pending — a
        // fresh store (no recorded schema_version rows at all) has nothing
        // worth a copy yet.
        let is_fresh = db.open_tree("schema_version")?.is_empty();
        let pending = migrations::pending_versions(&db)?;
        if !is_fresh && !pending.is_empty() {
            let backup_dest = backup_dest_for_migration(&path, &pending);
            copy_dir_recursive(&path, &backup_dest)?;
            info!(
                dest = %backup_dest.display(),
                versions = ?pending,
                "backed up store before applying pending migrations"
            );
        }

        migrations::run_pending(&db)?;

        let store = Self {
            crcs: db.open_tree("crcs")?,
            crc_by_site: db.open_tree("crc_by_site")?,
            evidence_entries: db.open_tree("evidence_entries")?,
            evidence_by_ts: db.open_tree("evidence_by_ts")?,
            evidence_by_cred_ts: db.open_tree("evidence_by_cred_ts")?,
            audit_events: db.open_tree("audit_events")?,
            audit_by_ts: db.open_tree("audit_by_ts")?,
            rotation_states: db.open_tree("rotation_states")?,
            rotation_by_expiry: db.open_tree("rotation_by_expiry")?,
            meta: db.open_tree("meta")?,
            db,
            path,
        };

        store.integrity_check()?;
        info!(path = %store.path.display(), "store opened");
        Ok(store)
    }

    /// Validates that every row in every known tree still deserializes.
    pub fn integrity_check(&self) -> Result<(), StoreError> {
        for item in self.crcs.iter() {
            let (_, v) = item?;
            bincode::deserialize::<Crc>(&v)
                .map_err(|e| StoreError::Corruption(format!("crcs: {e}")))?;
        }
        for item in self.evidence_entries.iter() {
            let (_, v) = item?;
            bincode::deserialize::<EvidenceEntry>(&v)
                .map_err(|e| StoreError::Corruption(format!("evidence_entries: {e}")))?;
        }
        for item in self.rotation_states.iter() {
            let (_, v) = item?;
            bincode::deserialize::<RotationState>(&v)
                .map_err(|e| StoreError::Corruption(format!("rotation_states: {e}")))?;
        }
        for item in self.audit_events.iter() {
            let (_, v) = item?;
            bincode::deserialize::<AuditEvent>(&v)
                .map_err(|e| StoreError::Corruption(format!("audit_events: {e}")))?;
        }
        Ok(())
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Copies the store's on-disk directory to `dest`, after flushing —
    /// a consistent snapshot suitable for restore. Called automatically
    /// before migrations by `acm-node`'s startup sequence.
    pub fn backup<P: AsRef<Path>>(&self, dest: P) -> Result<(), StoreError> {
        self.flush()?;
        let dest = dest.as_ref();
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        copy_dir_recursive(&self.path, dest)?;
        debug!(dest = %dest.display(), "store backed up");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── CRCs ──────────────────────────────────────────────────────────────────

    pub fn put_crc(&self, crc: &Crc) -> Result<(), StoreError> {
        let bytes = bincode::serialize(crc)?;
        let index_key = crc_site_key(&crc.site, crc.parsed_at, &crc.id);

        let result: Result<(), TransactionError<StoreError>> =
            (&self.crcs, &self.crc_by_site).transaction(|(crcs, by_site)| {
                crcs.insert(crc.id.as_bytes(), bytes.clone())?;
                by_site.insert(index_key.clone(), crc.id.as_bytes())?;
                Ok(())
            });
        result.map_err(tx_err)
    }

    pub fn get_crc(&self, id: &str) -> Result<Option<Crc>, StoreError> {
        match self.crcs.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the most recently parsed CRC for `site`, regardless of
    /// expiry — callers (the CRC cache) filter by `now` themselves.
    pub fn get_latest_crc_for_site(&self, site: &str) -> Result<Option<Crc>, StoreError> {
        let mut prefix = site.as_bytes().to_vec();
        prefix.push(0);
        if let Some(item) = self.crc_by_site.scan_prefix(&prefix).last() {
            let (_, id_bytes) = item?;
            let id = String::from_utf8_lossy(&id_bytes).to_string();
            self.get_crc(&id)
        } else {
            Ok(None)
        }
    }

    pub fn list_crcs(&self, site_filter: Option<&str>) -> Result<Vec<Crc>, StoreError> {
        let mut out = Vec::new();
        for item in self.crcs.iter() {
            let (_, v) = item?;
            let crc: Crc = bincode::deserialize(&v)?;
            if site_filter.map(|s| s == crc.site).unwrap_or(true) {
                out.push(crc);
            }
        }
        Ok(out)
    }

    /// Removes a single CRC row (and its secondary-index entry) by id,
    /// leaving any other rows for the same site untouched.
    pub fn delete_crc(&self, id: &str) -> Result<bool, StoreError> {
        let Some(crc) = self.get_crc(id)? else {
            return Ok(false);
        };
        self.crc_by_site
            .remove(crc_site_key(&crc.site, crc.parsed_at, &crc.id))?;
        self.crcs.remove(id.as_bytes())?;
        Ok(true)
    }

    pub fn delete_crcs_for_site(&self, site: &str) -> Result<usize, StoreError> {
        let ids: Vec<String> = self
            .list_crcs(Some(site))?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let mut prefix = site.as_bytes().to_vec();
        prefix.push(0);
        let index_keys: Vec<Vec<u8>> = self
            .crc_by_site
            .scan_prefix(&prefix)
            .keys()
            .filter_map(|k| k.ok().map(|k| k.to_vec()))
            .collect();

        for id in &ids {
            self.crcs.remove(id.as_bytes())?;
        }
        for key in index_keys {
            self.crc_by_site.remove(key)?;
        }
        Ok(ids.len())
    }

    pub fn clear_crcs(&self) -> Result<(), StoreError> {
        self.crcs.clear()?;
        self.crc_by_site.clear()?;
        Ok(())
    }

    pub fn crc_summaries(&self, now: Timestamp, include_expired: bool) -> Result<Vec<CrcSummary>, StoreError> {
        let mut out = Vec::new();
        for item in self.crcs.iter() {
            let (_, v) = item?;
            let crc: Crc = bincode::deserialize(&v)?;
            let expired = crc.expires_at <= now;
            if expired && !include_expired {
                continue;
            }
            out.push(CrcSummary {
                id: crc.id,
                site: crc.site,
                parsed_at: crc.parsed_at,
                expires_at: crc.expires_at,
                recommendation: crc.recommendation,
                rule_count: crc.rules.len(),
                expired,
            });
        }
        Ok(out)
    }

    // ── Evidence chain ───────────────────────────────────────────────────────

    /// Inserts a new entry, enforcing (inside the transaction) that its
    /// `previous_entry_id`, if set, already exists — an application-code
    /// analogue of a foreign-key trigger.
    pub fn insert_evidence_entry(&self, entry: &EvidenceEntry) -> Result<(), StoreError> {
        let bytes = bincode::serialize(entry)?;
        let ts_key = evidence_ts_key(entry.timestamp, &entry.id);
        let cred_key = evidence_cred_key(&entry.credential_id_hash, entry.timestamp, &entry.id);
        let previous = entry.previous_entry_id.clone();

        let result: Result<(), TransactionError<StoreError>> = (
            &self.evidence_entries,
            &self.evidence_by_ts,
            &self.evidence_by_cred_ts,
        )
            .transaction(|(entries, by_ts, by_cred)| {
                if let Some(prev_id) = &previous {
                    if entries.get(prev_id.as_bytes())?.is_none() {
                        return Err(ConflictableTransactionError::Abort(StoreError::Conflict(
                            format!("previous_entry_id {prev_id} does not exist"),
                        )));
                    }
                }
                entries.insert(entry.id.as_bytes(), bytes.clone())?;
                by_ts.insert(ts_key.clone(), entry.id.as_bytes())?;
                by_cred.insert(cred_key.clone(), entry.id.as_bytes())?;
                Ok(())
            });
        result.map_err(tx_err)
    }

    pub fn get_evidence_entry(&self, id: &str) -> Result<Option<EvidenceEntry>, StoreError> {
        match self.evidence_entries.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The entry with the greatest timestamp; ties broken by id
    /// lexicographic order — guaranteed by
    /// the `ts || id` key encoding sorting entries in exactly that order.
    pub fn get_chain_head(&self) -> Result<Option<EvidenceEntry>, StoreError> {
        if let Some(item) = self.evidence_by_ts.iter().last() {
            let (_, id_bytes) = item?;
            let id = String::from_utf8_lossy(&id_bytes).to_string();
            self.get_evidence_entry(&id)
        } else {
            Ok(None)
        }
    }

    pub fn get_chain_length(&self) -> u64 {
        self.evidence_entries.len() as u64
    }

    /// All entries in timestamp-ascending (then id-ascending) order.
    pub fn iter_evidence_ordered(&self) -> Result<Vec<EvidenceEntry>, StoreError> {
        let mut out = Vec::new();
        for item in self.evidence_by_ts.iter() {
            let (_, id_bytes) = item?;
            let id = String::from_utf8_lossy(&id_bytes).to_string();
            if let Some(entry) = self.get_evidence_entry(&id)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn export_evidence(&self, filter: &EvidenceFilter) -> Result<Vec<EvidenceEntry>, StoreError> {
        let entries = if let Some(cred) = &filter.credential_id_hash {
            let mut prefix = cred.as_bytes().to_vec();
            prefix.push(0);
            let mut out = Vec::new();
            for item in self.evidence_by_cred_ts.scan_prefix(&prefix) {
                let (_, id_bytes) = item?;
                let id = String::from_utf8_lossy(&id_bytes).to_string();
                if let Some(entry) = self.get_evidence_entry(&id)? {
                    out.push(entry);
                }
            }
            out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
            out
        } else {
            self.iter_evidence_ordered()?
        };

        Ok(entries
            .into_iter()
            .filter(|e| filter.start_time.map(|s| e.timestamp >= s).unwrap_or(true))
            .filter(|e| filter.end_time.map(|en| e.timestamp <= en).unwrap_or(true))
            .collect())
    }

    /// Destructive: removes every evidence entry and its indexes. Used
    /// only by `disable(clear_cache=true, preserve_evidence=false)`.
    pub fn clear_evidence(&self) -> Result<(), StoreError> {
        self.evidence_entries.clear()?;
        self.evidence_by_ts.clear()?;
        self.evidence_by_cred_ts.clear()?;
        Ok(())
    }

    // ── Rotation states ───────────────────────────────────────────────────────

    pub fn put_rotation_state(&self, state: &RotationState) -> Result<(), StoreError> {
        let bytes = bincode::serialize(state)?;
        let new_index_key = rotation_expiry_key(state.expires_at, &state.id);
        let old = self.get_rotation_state(&state.id)?;

        let result: Result<(), TransactionError<StoreError>> =
            (&self.rotation_states, &self.rotation_by_expiry).transaction(|(states, by_expiry)| {
                if let Some(old) = &old {
                    if old.expires_at != state.expires_at {
                        by_expiry.remove(rotation_expiry_key(old.expires_at, &old.id))?;
                    }
                }
                states.insert(state.id.as_bytes(), bytes.clone())?;
                by_expiry.insert(new_index_key.clone(), state.id.as_bytes())?;
                Ok(())
            });
        result.map_err(tx_err)
    }

    pub fn get_rotation_state(&self, id: &str) -> Result<Option<RotationState>, StoreError> {
        match self.rotation_states.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_rotation_states(&self) -> Result<Vec<RotationState>, StoreError> {
        let mut out = Vec::new();
        for item in self.rotation_states.iter() {
            let (_, v) = item?;
            out.push(bincode::deserialize(&v)?);
        }
        Ok(out)
    }

    pub fn delete_rotation_state(&self, id: &str) -> Result<(), StoreError> {
        if let Some(state) = self.get_rotation_state(id)? {
            self.rotation_by_expiry
                .remove(rotation_expiry_key(state.expires_at, &state.id))?;
        }
        self.rotation_states.remove(id.as_bytes())?;
        Ok(())
    }

    /// Ids of rotation states whose `expires_at < now`.
    pub fn expired_rotation_ids(&self, now: Timestamp) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for item in self.rotation_by_expiry.iter() {
            let (key, id_bytes) = item?;
            let ts_bytes: [u8; 8] = key[..8].try_into().unwrap();
            let ts = Timestamp::from_be_bytes(ts_bytes);
            if ts >= now {
                break;
            }
            out.push(String::from_utf8_lossy(&id_bytes).to_string());
        }
        Ok(out)
    }

    // ── Audit events (legacy) ────────────────────────────────────────────────

    pub fn put_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let bytes = bincode::serialize(event)?;
        let ts_key = audit_ts_key(event.timestamp, event.event_id);

        let result: Result<(), TransactionError<StoreError>> =
            (&self.audit_events, &self.audit_by_ts).transaction(|(events, by_ts)| {
                events.insert(&event.event_id.to_be_bytes(), bytes.clone())?;
                by_ts.insert(ts_key.clone(), &event.event_id.to_be_bytes())?;
                Ok(())
            });
        result.map_err(tx_err)
    }

    /// Allocates a fresh, monotonically increasing audit event id.
    pub fn next_audit_event_id(&self) -> Result<u64, StoreError> {
        Ok(self.db.generate_id()?)
    }

    pub fn list_audit_events(&self) -> Result<Vec<AuditEvent>, StoreError> {
        let mut out = Vec::new();
        for item in self.audit_by_ts.iter() {
            let (_, id_bytes) = item?;
            if let Some(bytes) = self.audit_events.get(&id_bytes)? {
                out.push(bincode::deserialize(&bytes)?);
            }
        }
        Ok(out)
    }

    // ── Meta ──────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.meta.insert(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.meta.get(key.as_bytes())?.map(|v| v.to_vec()))
    }
}

fn tx_err(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(sled_err) => StoreError::Backend(sled_err.to_string()),
    }
}

/// Destination for an automatic pre-migration backup: a sibling
/// `backups/` directory next to the store itself, named after the
/// highest pending migration version and the current time so repeated
/// runs never collide.
fn backup_dest_for_migration(store_path: &Path, pending: &[u32]) -> PathBuf {
    let highest = pending.iter().copied().max().unwrap_or(0);
    let now_secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let parent = store_path.parent().unwrap_or(store_path);
    parent
        .join("backups")
        .join(format!("acm-migration-v{highest}-{now_secs}.db"))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}
