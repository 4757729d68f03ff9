//! Versioned, checksummed migrations.
//!
//! There is no SQL engine underneath `sled`, so a "migration" here is a
//! plain Rust function over the open `sled::Db`. Each is tagged with a
//! fixed version and a checksum of its own behavior description; the
//! applied `(version, checksum)` pairs are recorded in the
//! `schema_version` tree so a later binary can detect drift between what
//! it expects and what was actually applied.

use acm_crypto::sha256_hex;
use sled::Db;

use crate::error::StoreError;

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&Db) -> Result<(), StoreError>,
}

impl Migration {
    /// Checksum of this migration's identity — version + description is
    /// sufficient here since the "script" is the Rust function itself and
    /// can't drift independently of the binary that defines it.
    pub fn checksum(&self) -> String {
        sha256_hex(format!("{}:{}", self.version, self.description).as_bytes())
    }
}

/// `001`: create the named trees used by every collection. Opening a tree
/// that doesn't exist is a no-op in sled, so this migration's job is
/// purely to record that the schema at this version exists, for
/// integrity-checking on future opens.
fn migration_001_initial_schema(db: &Db) -> Result<(), StoreError> {
    for name in [
        "crcs",
        "crc_by_site",
        "evidence_entries",
        "evidence_by_ts",
        "evidence_by_cred_ts",
        "audit_events",
        "audit_by_ts",
        "rotation_states",
        "rotation_by_expiry",
        "meta",
    ] {
        db.open_tree(name)?;
    }
    Ok(())
}

pub fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "initial schema: crcs, evidence_entries, audit_events, rotation_states",
        apply: migration_001_initial_schema,
    }]
}

/// Versions that `run_pending` would actually apply if called right now,
/// without applying them. Used to decide whether a pre-migration backup
/// is worth taking — an empty result means either a fresh store (nothing
/// to back up) or one already fully migrated.
pub fn pending_versions(db: &Db) -> Result<Vec<u32>, StoreError> {
    let schema_version = db.open_tree("schema_version")?;
    let mut pending = Vec::new();
    for migration in all_migrations() {
        if schema_version.get(migration.version.to_be_bytes())?.is_none() {
            pending.push(migration.version);
        }
    }
    Ok(pending)
}

/// Applies all pending migrations in ascending version order inside a
/// single logical pass, verifying that any already-applied migration's
/// recorded checksum still matches the current binary's definition.
pub fn run_pending(db: &Db) -> Result<(), StoreError> {
    let schema_version = db.open_tree("schema_version")?;

    for migration in all_migrations() {
        let key = migration.version.to_be_bytes();
        let checksum = migration.checksum();

        match schema_version.get(key)? {
            Some(recorded) => {
                let recorded = String::from_utf8_lossy(&recorded).to_string();
                if recorded != checksum {
                    return Err(StoreError::Migration(format!(
                        "migration {} checksum mismatch: recorded {}, expected {}",
                        migration.version, recorded, checksum
                    )));
                }
            }
            None => {
                (migration.apply)(db).map_err(|e| {
                    StoreError::Migration(format!(
                        "migration {} ({}) failed: {e}",
                        migration.version, migration.description
                    ))
                })?;
                schema_version.insert(key, checksum.as_bytes())?;
            }
        }
    }

    schema_version.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        run_pending(&db).unwrap();
        // Running again must not fail or re-apply.
        run_pending(&db).unwrap();
    }

    #[test]
    fn pending_versions_reports_nothing_once_applied() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        assert_eq!(pending_versions(&db).unwrap(), vec![1]);
        run_pending(&db).unwrap();
        assert!(pending_versions(&db).unwrap().is_empty());
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        run_pending(&db).unwrap();

        let schema_version = db.open_tree("schema_version").unwrap();
        schema_version.insert(1u32.to_be_bytes(), b"tampered".as_ref()).unwrap();

        let err = run_pending(&db).unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
    }
}
