//! CRC cache: site → compliance rule set mapping with a
//! time-based eviction policy. No LRU — a CRC is valid until its
//! `expires_at` passes, full stop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use acm_core::{AcmError, Crc, CrcSummary, Timestamp};
use acm_crypto::generate_crc_id;
use acm_store::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Site-keyed cache of parsed ToS compliance rule sets, backed by the
/// persistent store's `crcs` collection.
pub struct CrcCache {
    store: Arc<Store>,
    ttl_secs: AtomicI64,
}

impl CrcCache {
    pub fn new(store: Arc<Store>, default_ttl_secs: i64) -> Self {
        Self {
            store,
            ttl_secs: AtomicI64::new(default_ttl_secs),
        }
    }

    /// Affects only subsequently stored CRCs, not ones already cached.
    pub fn set_cache_ttl(&self, ttl_secs: i64) {
        self.ttl_secs.store(ttl_secs, Ordering::Relaxed);
    }

    pub fn cache_ttl(&self) -> i64 {
        self.ttl_secs.load(Ordering::Relaxed)
    }

    /// Stores `crc`, computing `id` if the caller left it empty, stamping
    /// `stored_at = now` and `expires_at = now + ttl` unless the caller
    /// already set a later expiry. `INSERT OR REPLACE` semantics on `id`.
    pub fn store(&self, mut crc: Crc, now: Timestamp) -> Result<Crc, AcmError> {
        if crc.id.is_empty() {
            crc.id = generate_crc_id(&crc.site, &crc.tos_hash);
        }
        crc.stored_at = now;
        if crc.expires_at <= now {
            crc.expires_at = now + self.cache_ttl();
        }
        self.store.put_crc(&crc)?;
        Ok(crc)
    }

    /// The most recently parsed non-expired CRC for `site`, or `None`.
    /// Expired rows are never returned here; they linger until
    /// `clean_expired` purges them.
    pub fn get(&self, site: &str, now: Timestamp) -> Result<Option<Crc>, AcmError> {
        match self.store.get_latest_crc_for_site(site)? {
            Some(crc) if crc.expires_at > now => Ok(Some(crc)),
            _ => Ok(None),
        }
    }

    pub fn list(&self, site_filter: Option<&str>, include_expired: bool, now: Timestamp) -> Result<Vec<CrcSummary>, AcmError> {
        Ok(self.store.crc_summaries(now, include_expired)?
            .into_iter()
            .filter(|s| site_filter.map(|site| site == s.site).unwrap_or(true))
            .collect())
    }

    /// Deletes all rows for `site`; idempotent.
    pub fn invalidate(&self, site: &str) -> Result<usize, AcmError> {
        Ok(self.store.delete_crcs_for_site(site)?)
    }

    /// Purges entries whose `expires_at <= now`, returning the count removed.
    /// Removes exactly the expired rows — a site with both an expired and a
    /// still-valid CRC keeps the valid one.
    pub fn clean_expired(&self, now: Timestamp) -> Result<usize, AcmError> {
        let expired_ids: Vec<String> = self
            .store
            .list_crcs(None)?
            .into_iter()
            .filter(|c| c.expires_at <= now)
            .map(|c| c.id)
            .collect();
        let mut removed = 0;
        for id in expired_ids {
            if self.store.delete_crc(&id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Destructive: drops every cached CRC. Used only on explicit
    /// user opt-out (`ACVS::disable(clear_cache: true, ..)`).
    pub fn clear(&self) -> Result<(), AcmError> {
        self.store.clear_crcs()?;
        Ok(())
    }

    pub fn get_stats(&self, now: Timestamp) -> Result<CacheStats, AcmError> {
        let all = self.store.list_crcs(None)?;
        let total = all.len();
        let expired = all.iter().filter(|c| c.expires_at <= now).count();
        Ok(CacheStats {
            total,
            valid: total - expired,
            expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acm_core::Recommendation;

    fn cache() -> (tempfile::TempDir, CrcCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(acm_store::Store::open(dir.path().join("acm"), acm_store::StoreConfig::default()).unwrap());
        (dir, CrcCache::new(store, 3600))
    }

    fn sample(site: &str) -> Crc {
        Crc {
            id: String::new(),
            site: site.to_string(),
            tos_url: format!("https://{site}/tos"),
            tos_version: "v1".into(),
            tos_hash: "a".repeat(64),
            parsed_at: 0,
            expires_at: 0,
            rules: vec![],
            recommendation: Recommendation::Allowed,
            reasoning: "fine".into(),
            signature: "sig".into(),
            stored_at: 0,
        }
    }

    #[test]
    fn store_then_get_round_trips_except_stored_at() {
        let (_dir, cache) = cache();
        let mut crc = sample("example.com");
        crc.id = "CRC-example.com-aaaaaaaaaaaaaaaa".into();
        let stored = cache.store(crc.clone(), 1_000).unwrap();
        let fetched = cache.get("example.com", 1_000).unwrap().unwrap();
        assert_eq!(fetched.id, stored.id);
        assert_eq!(fetched.site, crc.site);
        assert_eq!(fetched.tos_hash, crc.tos_hash);
        assert_eq!(fetched.stored_at, 1_000);
    }

    #[test]
    fn store_computes_id_when_caller_leaves_it_empty() {
        let (_dir, cache) = cache();
        let mut crc = sample("example.com");
        crc.expires_at = 5_000;
        assert!(crc.id.is_empty());
        let stored = cache.store(crc, 1_000).unwrap();
        assert!(!stored.id.is_empty());
        let fetched = cache.get("example.com", 1_000).unwrap().unwrap();
        assert_eq!(fetched.id, stored.id);
    }

    #[test]
    fn expired_entries_are_hidden_from_get_but_visible_in_list() {
        let (_dir, cache) = cache();
        let mut crc = sample("expiring.example");
        crc.id = "CRC-expiring.example-bbbbbbbbbbbbbbbb".into();
        crc.expires_at = 1_001;
        cache.store(crc, 1_000).unwrap();

        assert!(cache.get("expiring.example", 2_000).unwrap().is_none());
        let listed = cache.list(Some("expiring.example"), true, 2_000).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].expired);
    }

    #[test]
    fn clean_expired_purges_only_expired_rows() {
        let (_dir, cache) = cache();
        let mut fresh = sample("fresh.example");
        fresh.id = "CRC-fresh-1".into();
        fresh.expires_at = 5_000;
        cache.store(fresh, 1_000).unwrap();

        let mut stale = sample("stale.example");
        stale.id = "CRC-stale-1".into();
        stale.expires_at = 1_001;
        cache.store(stale, 1_000).unwrap();

        let removed = cache.clean_expired(2_000).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("fresh.example", 2_000).unwrap().is_some());
        assert!(cache.get("stale.example", 2_000).unwrap().is_none());
    }

    #[test]
    fn clean_expired_keeps_a_still_valid_crc_for_the_same_site() {
        let (_dir, cache) = cache();
        let mut stale = sample("example.com");
        stale.id = "CRC-example.com-stale".into();
        stale.parsed_at = 1_000;
        stale.expires_at = 1_001;
        cache.store(stale, 1_000).unwrap();

        let mut fresh = sample("example.com");
        fresh.id = "CRC-example.com-fresh".into();
        fresh.parsed_at = 2_000;
        fresh.expires_at = 9_000;
        cache.store(fresh, 2_000).unwrap();

        let removed = cache.clean_expired(5_000).unwrap();
        assert_eq!(removed, 1);
        let remaining = cache.get("example.com", 5_000).unwrap().unwrap();
        assert_eq!(remaining.id, "CRC-example.com-fresh");
    }

    #[test]
    fn invalidate_is_idempotent() {
        let (_dir, cache) = cache();
        let mut crc = sample("example.com");
        crc.id = "CRC-example.com-1".into();
        crc.expires_at = 5_000;
        cache.store(crc, 1_000).unwrap();
        assert_eq!(cache.invalidate("example.com").unwrap(), 1);
        assert_eq!(cache.invalidate("example.com").unwrap(), 0);
        assert!(cache.get("example.com", 1_000).unwrap().is_none());
    }

    #[test]
    fn set_cache_ttl_only_affects_future_stores() {
        let (_dir, cache) = cache();
        cache.set_cache_ttl(10);
        let mut crc = sample("example.com");
        crc.id = "CRC-example.com-1".into();
        let stored = cache.store(crc, 1_000).unwrap();
        assert_eq!(stored.expires_at, 1_010);
    }
}
