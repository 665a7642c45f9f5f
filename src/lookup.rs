//! On-demand signal lookup for a single account or opportunity.
//!
//! Read order: in-memory cache (short TTL) → signal store → a synchronous run
//! of the call pipeline for just this entity. Only non-empty results are
//! cached, so an entity with no signals is retried on the next lookup.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::db::{SharedDb, StoredSignal};
use crate::error::SignalError;
use crate::pipeline::CallPipeline;
use crate::scope::Scope;

pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CachedSignals {
    signals: Vec<StoredSignal>,
    cached_at: Instant,
}

pub struct SignalLookup {
    db: SharedDb,
    pipeline: CallPipeline,
    cache: DashMap<String, CachedSignals>,
    ttl: Duration,
}

/// Cache identity for a scope: the most specific id, else the display name.
fn cache_key(scope: &Scope) -> Option<String> {
    if let Some(opp) = &scope.opportunity_id {
        return Some(format!("opp:{}", opp));
    }
    if let Some(acc) = &scope.account_id {
        return Some(format!("acc:{}", acc));
    }
    scope
        .display_name()
        .map(|name| format!("name:{}", name.trim().to_lowercase()))
}

impl SignalLookup {
    pub fn new(db: SharedDb, pipeline: CallPipeline) -> Self {
        Self {
            db,
            pipeline,
            cache: DashMap::new(),
            ttl: CACHE_TTL,
        }
    }

    /// Signals for `scope`; any failure degrades to an empty list.
    pub async fn get_signals(&self, scope: &Scope, query: Option<&str>) -> Vec<StoredSignal> {
        match self.try_get_signals(scope, query).await {
            Ok(signals) => signals,
            Err(e) => {
                log::warn!("Lookup: signals for {:?} unavailable: {}", scope, e);
                Vec::new()
            }
        }
    }

    pub async fn try_get_signals(
        &self,
        scope: &Scope,
        query: Option<&str>,
    ) -> Result<Vec<StoredSignal>, SignalError> {
        self.observe_account(scope);

        let Some(key) = cache_key(scope) else {
            return Ok(Vec::new());
        };

        let cached = self
            .cache
            .get(&key)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.signals.clone());
        if let Some(signals) = cached {
            return Ok(signals);
        }
        self.cache.remove_if(&key, |_, entry| entry.cached_at.elapsed() >= self.ttl);

        let stored = self.read_store(scope)?;
        if !stored.is_empty() {
            self.remember(key, &stored);
            return Ok(stored);
        }

        let derived = self.pipeline.run_for_scope(scope, query).await?;
        if !derived.is_empty() {
            self.remember(key, &derived);
        }
        Ok(derived)
    }

    /// Drop the cached entry for `scope`.
    pub fn invalidate(&self, scope: &Scope) {
        if let Some(key) = cache_key(scope) {
            self.cache.remove(&key);
        }
    }

    fn remember(&self, key: String, signals: &[StoredSignal]) {
        self.cache.insert(
            key,
            CachedSignals {
                signals: signals.to_vec(),
                cached_at: Instant::now(),
            },
        );
    }

    fn read_store(&self, scope: &Scope) -> Result<Vec<StoredSignal>, SignalError> {
        let db = self.db.lock();
        let signals = match (&scope.opportunity_id, &scope.account_id) {
            (Some(opp), _) => db.get_signals_by_opportunity_ids(std::slice::from_ref(opp))?,
            (None, Some(acc)) => db.get_signals_by_account_ids(std::slice::from_ref(acc))?,
            (None, None) => Vec::new(),
        };
        Ok(signals)
    }

    /// Feed the account name cache that batch news runs enumerate.
    fn observe_account(&self, scope: &Scope) {
        let (Some(account_id), Some(name)) = (&scope.account_id, &scope.account_name) else {
            return;
        };
        if name.trim().is_empty() {
            return;
        }
        if let Err(e) = self.db.lock().observe_account(account_id, name.trim(), None) {
            log::warn!("Lookup: failed to cache account name for {}: {}", account_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::analysis::fake::ScriptedAnalyzer;
    use crate::config::test_utils::test_config_store;
    use crate::db::test_utils::test_db;
    use crate::db::{NewSignal, SignalSource};
    use crate::gong::fake::{call, FakeGong};
    use crate::gong::GongClient;
    use serde_json::json;

    struct Harness {
        fake: Arc<FakeGong>,
        db: SharedDb,
        lookup: SignalLookup,
    }

    fn harness(calls: Vec<crate::types::CallRecord>) -> Harness {
        let fake = Arc::new(FakeGong::with_calls(calls));
        let db = test_db().into_shared();
        let pipeline = CallPipeline::new(
            Arc::new(GongClient::with_transport(fake.clone())),
            Arc::new(ScriptedAnalyzer::default()),
            db.clone(),
            test_config_store(|_| {}),
            1000,
        );
        Harness {
            fake,
            db: db.clone(),
            lookup: SignalLookup::new(db, pipeline),
        }
    }

    fn opp_scope() -> Scope {
        Scope::opportunity("opp-1", Some("acc-1")).with_account_name("Acme")
    }

    fn clear_store(db: &SharedDb) {
        db.lock()
            .conn_ref()
            .execute("DELETE FROM buying_signals", [])
            .unwrap();
    }

    #[test]
    fn test_cache_key_prefers_ids() {
        assert_eq!(cache_key(&opp_scope()).as_deref(), Some("opp:opp-1"));
        assert_eq!(cache_key(&Scope::account("acc-1")).as_deref(), Some("acc:acc-1"));
        assert_eq!(
            cache_key(&Scope::default().with_account_name(" Globex ")).as_deref(),
            Some("name:globex")
        );
        assert_eq!(cache_key(&Scope::default()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_hit_skips_pipeline() {
        let h = harness(Vec::new());
        h.db.lock()
            .upsert_signals(&[NewSignal {
                account_id: "acc-1".to_string(),
                opportunity_id: Some("opp-1".to_string()),
                source: SignalSource::CallDerived,
                payload: json!({"signals": []}),
                expires_at: None,
            }])
            .unwrap();

        let signals = h.lookup.get_signals(&opp_scope(), None).await;

        assert_eq!(signals.len(), 1);
        assert_eq!(h.fake.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_result_cached_until_ttl() {
        let h = harness(vec![call("c1", "Pricing").with_opportunity("opp-1", "acc-1")]);

        let first = h.lookup.get_signals(&opp_scope(), Some("pricing")).await;
        assert_eq!(first.len(), 1);
        let requests_after_first = h.fake.request_count();
        assert!(requests_after_first > 0);

        // served from memory even with the store emptied
        clear_store(&h.db);
        let second = h.lookup.get_signals(&opp_scope(), None).await;
        assert_eq!(second, first);
        assert_eq!(h.fake.request_count(), requests_after_first);

        tokio::time::advance(CACHE_TTL + Duration::from_secs(1)).await;
        let third = h.lookup.get_signals(&opp_scope(), None).await;
        assert_eq!(third.len(), 1);
        assert!(h.fake.request_count() > requests_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_not_cached() {
        let h = harness(vec![call("c1", "Other").with_opportunity("opp-2", "acc-2")]);

        assert!(h.lookup.get_signals(&opp_scope(), None).await.is_empty());
        let after_first = h.fake.request_count();
        assert!(h.lookup.get_signals(&opp_scope(), None).await.is_empty());
        assert!(h.fake.request_count() > after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_store_read() {
        let h = harness(vec![call("c1", "Pricing").with_opportunity("opp-1", "acc-1")]);
        assert_eq!(h.lookup.get_signals(&opp_scope(), None).await.len(), 1);

        clear_store(&h.db);
        h.lookup.invalidate(&opp_scope());
        h.fake.fail_path("/calls");

        assert!(h.lookup.get_signals(&opp_scope(), None).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_degrade_to_empty() {
        let h = harness(Vec::new());
        h.fake.fail_path("/calls");

        assert!(h.lookup.get_signals(&opp_scope(), None).await.is_empty());
        let err = h.lookup.try_get_signals(&opp_scope(), None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_records_account_name() {
        let h = harness(Vec::new());
        h.lookup.get_signals(&opp_scope(), None).await;

        assert_eq!(
            h.db.lock().get_account_name("acc-1").unwrap().as_deref(),
            Some("Acme")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_scope_without_name_does_nothing() {
        let h = harness(vec![call("c1", "Pricing")]);
        assert!(h.lookup.get_signals(&Scope::default(), None).await.is_empty());
        assert_eq!(h.fake.request_count(), 0);
    }
}
