//! Policy cache: the one shared-mutable structure in the engine.
//!
//! Readers take an `Arc` to the current generation and never block on a
//! refresh in progress. Refreshes are serialized by their own lock, build a
//! complete new generation off to the side and publish it with a single
//! pointer swap, so a reader sees either the old mapping or the new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use fleetscale_state::{AppId, PolicyStore, ScalingPolicy, lint, parse_policy, validate};

use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, EngineResult, Stage};
use crate::health::EngineHealth;

/// Default bound on a single policy-store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// One published snapshot of the policy mapping.
#[derive(Debug, Default)]
pub struct CacheGeneration {
    /// Zero until the first successful refresh.
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    policies: HashMap<AppId, Arc<ScalingPolicy>>,
}

impl CacheGeneration {
    pub fn get(&self, app_id: &str) -> Option<Arc<ScalingPolicy>> {
        self.policies.get(app_id).cloned()
    }

    /// Tracked application ids, sorted.
    pub fn app_ids(&self) -> Vec<AppId> {
        let mut ids: Vec<AppId> = self.policies.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Outcome of a successful bulk refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub generation: u64,
    /// Policies parsed and validated from this pull.
    pub loaded: usize,
    /// Applications whose record was invalid but whose previous policy was kept.
    pub retained: Vec<AppId>,
    /// Every invalid record, with the reason it was rejected.
    pub rejected: Vec<(AppId, String)>,
}

pub struct PolicyCache {
    store: Arc<dyn PolicyStore>,
    current: RwLock<Arc<CacheGeneration>>,
    refresh_lock: Mutex<()>,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl PolicyCache {
    /// An empty cache over `store`. Nothing is loaded until [`refresh`](Self::refresh).
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            current: RwLock::new(Arc::new(CacheGeneration::default())),
            refresh_lock: Mutex::new(()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The current generation.
    pub async fn snapshot(&self) -> Arc<CacheGeneration> {
        self.current.read().await.clone()
    }

    pub async fn get(&self, app_id: &str) -> EngineResult<Arc<ScalingPolicy>> {
        self.snapshot()
            .await
            .get(app_id)
            .ok_or_else(|| EngineError::PolicyNotFound(app_id.to_string()))
    }

    pub async fn list_tracked_ids(&self) -> Vec<AppId> {
        self.snapshot().await.app_ids()
    }

    /// Pull every policy from the store and publish a new generation.
    ///
    /// A store failure leaves the current generation untouched. An invalid
    /// record is rejected; its application keeps the policy it had, if any.
    pub async fn refresh(&self) -> EngineResult<RefreshReport> {
        let _writer = self.refresh_lock.lock().await;

        let records = match tokio::time::timeout(self.store_timeout, self.store.retrieve_policies()).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(error = %e, "policy refresh failed, serving previous generation");
                return Err(EngineError::StoreUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!(timeout = ?self.store_timeout, "policy refresh timed out, serving previous generation");
                return Err(EngineError::Timeout {
                    stage: Stage::PolicyStore,
                    after: self.store_timeout,
                });
            }
        };

        let previous = self.snapshot().await;
        let now = self.clock.now();
        let mut report = RefreshReport::default();
        let mut policies = HashMap::with_capacity(records.len());

        for record in records {
            match parse_policy(&record.policy_json) {
                Ok(policy) => {
                    for warning in lint(&policy, now) {
                        warn!(app_id = %record.app_id, %warning, "policy warning");
                    }
                    report.loaded += 1;
                    policies.insert(record.app_id, Arc::new(policy));
                }
                Err(e) => {
                    warn!(app_id = %record.app_id, error = %e, "rejected invalid policy");
                    if let Some(stale) = previous.get(&record.app_id) {
                        report.retained.push(record.app_id.clone());
                        policies.insert(record.app_id.clone(), stale);
                    }
                    report.rejected.push((record.app_id, e.to_string()));
                }
            }
        }

        report.generation = previous.generation + 1;
        let next = CacheGeneration {
            generation: report.generation,
            refreshed_at: Some(now),
            policies,
        };
        *self.current.write().await = Arc::new(next);

        info!(
            generation = report.generation,
            loaded = report.loaded,
            retained = report.retained.len(),
            rejected = report.rejected.len(),
            "policy cache refreshed"
        );
        Ok(report)
    }

    /// Reload one application's policy. `Ok(None)` means the store has no
    /// policy for it any more and it was evicted.
    pub async fn refresh_app(&self, app_id: &str) -> EngineResult<Option<Arc<ScalingPolicy>>> {
        let _writer = self.refresh_lock.lock().await;

        let fetched = tokio::time::timeout(self.store_timeout, self.store.get_app_policy(app_id))
            .await
            .map_err(|_| EngineError::Timeout {
                stage: Stage::PolicyStore,
                after: self.store_timeout,
            })?
            .map_err(|e| EngineError::from_store(app_id, e))?;

        let policy = match fetched {
            Some(policy) => {
                validate(&policy).map_err(|e| EngineError::from_store(app_id, e))?;
                Some(Arc::new(policy))
            }
            None => None,
        };

        let previous = self.snapshot().await;
        let mut policies = previous.policies.clone();
        match &policy {
            Some(p) => {
                policies.insert(app_id.to_string(), p.clone());
            }
            None => {
                policies.remove(app_id);
            }
        }
        let next = CacheGeneration {
            generation: previous.generation + 1,
            refreshed_at: previous.refreshed_at,
            policies,
        };
        debug!(%app_id, generation = next.generation, present = policy.is_some(), "reloaded one policy");
        *self.current.write().await = Arc::new(next);
        Ok(policy)
    }

    /// Refresh every `interval` until `shutdown` flips, reporting each
    /// outcome to `health`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>, health: &EngineHealth) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; callers refresh before starting.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.refresh().await;
                    health.record_refresh(outcome.as_ref().err());
                }
                _ = shutdown.changed() => {
                    debug!("policy refresh loop stopping");
                    break;
                }
            }
        }
    }

    /// Release the underlying store.
    pub async fn close(&self) -> EngineResult<()> {
        self.store
            .close()
            .await
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscale_state::fake::{FakePolicyStore, PolicyStoreCall, record_for};
    use fleetscale_state::{PolicyRecord, StateError};

    fn policy(min: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy {
            instance_min_count: min,
            instance_max_count: max,
            scaling_rules: vec![],
            schedules: None,
        }
    }

    fn cache(store: &Arc<FakePolicyStore>) -> PolicyCache {
        PolicyCache::new(store.clone())
    }

    #[tokio::test]
    async fn empty_cache_reports_not_found() {
        let store = Arc::new(FakePolicyStore::new());
        let cache = cache(&store);
        assert!(matches!(cache.get("app").await, Err(EngineError::PolicyNotFound(_))));
        assert_eq!(cache.snapshot().await.generation, 0);
    }

    #[tokio::test]
    async fn refresh_loads_all_records() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns(Ok(vec![record_for("a", &policy(1, 4)), record_for("b", &policy(2, 6))]));
        let cache = cache(&store);

        let report = cache.refresh().await.unwrap();

        assert_eq!(report.generation, 1);
        assert_eq!(report.loaded, 2);
        assert_eq!(cache.list_tracked_ids().await, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.get("b").await.unwrap().instance_max_count, 6);
        assert_eq!(store.calls(), vec![PolicyStoreCall::RetrievePolicies]);
    }

    #[tokio::test]
    async fn store_failure_keeps_previous_generation() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns_on_call(0, Ok(vec![record_for("a", &policy(1, 4))]));
        store.retrieve_policies_returns_on_call(1, Err(StateError::Unavailable("connection refused".into())));
        let cache = cache(&store);

        cache.refresh().await.unwrap();
        let err = cache.refresh().await.unwrap_err();

        assert!(matches!(err, EngineError::StoreUnavailable(_)));
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.generation, 1);
        assert_eq!(cache.get("a").await.unwrap().instance_max_count, 4);
    }

    #[tokio::test]
    async fn invalid_record_retains_previous_policy() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns_on_call(0, Ok(vec![record_for("a", &policy(1, 4))]));
        store.retrieve_policies_returns_on_call(
            1,
            Ok(vec![
                PolicyRecord {
                    app_id: "a".into(),
                    policy_json: r#"{"instance_min_count": 5, "instance_max_count": 2}"#.into(),
                },
                PolicyRecord {
                    app_id: "b".into(),
                    policy_json: "not json".into(),
                },
            ]),
        );
        let cache = cache(&store);

        cache.refresh().await.unwrap();
        let report = cache.refresh().await.unwrap();

        assert_eq!(report.loaded, 0);
        assert_eq!(report.retained, vec!["a".to_string()]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(cache.get("a").await.unwrap().instance_max_count, 4);
        assert!(matches!(cache.get("b").await, Err(EngineError::PolicyNotFound(_))));
    }

    #[tokio::test]
    async fn refresh_drops_removed_applications() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns_on_call(0, Ok(vec![record_for("a", &policy(1, 4)), record_for("b", &policy(1, 4))]));
        store.retrieve_policies_returns_on_call(1, Ok(vec![record_for("b", &policy(1, 8))]));
        let cache = cache(&store);

        cache.refresh().await.unwrap();
        cache.refresh().await.unwrap();

        assert_eq!(cache.list_tracked_ids().await, vec!["b".to_string()]);
        assert_eq!(cache.get("b").await.unwrap().instance_max_count, 8);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_refresh() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns_on_call(0, Ok(vec![record_for("a", &policy(1, 4))]));
        store.retrieve_policies_returns_on_call(1, Ok(vec![record_for("a", &policy(1, 9))]));
        let cache = cache(&store);

        cache.refresh().await.unwrap();
        let before = cache.snapshot().await;
        cache.refresh().await.unwrap();

        assert_eq!(before.get("a").unwrap().instance_max_count, 4);
        assert_eq!(cache.get("a").await.unwrap().instance_max_count, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let store = Arc::new(FakePolicyStore::new());
        store.set_delay(Some(Duration::from_secs(60)));
        let cache = cache(&store).with_timeout(Duration::from_secs(1));

        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { stage: Stage::PolicyStore, .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::StoreUnavailable);
    }

    #[tokio::test]
    async fn refresh_app_updates_and_evicts() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns(Ok(vec![record_for("a", &policy(1, 4))]));
        store.get_app_policy_returns("a", Ok(Some(policy(2, 7))));
        let cache = cache(&store);
        cache.refresh().await.unwrap();

        let reloaded = cache.refresh_app("a").await.unwrap().unwrap();
        assert_eq!(reloaded.instance_max_count, 7);
        assert_eq!(cache.get("a").await.unwrap().instance_min_count, 2);

        store.get_app_policy_returns("a", Ok(None));
        assert!(cache.refresh_app("a").await.unwrap().is_none());
        assert!(cache.list_tracked_ids().await.is_empty());
        assert_eq!(store.get_app_policy_args_for_call(1), Some("a".to_string()));
    }

    #[tokio::test]
    async fn refresh_app_rejects_invalid_policy_and_keeps_cached() {
        let store = Arc::new(FakePolicyStore::new());
        store.retrieve_policies_returns(Ok(vec![record_for("a", &policy(1, 4))]));
        store.get_app_policy_returns("a", Ok(Some(policy(0, 4))));
        let cache = cache(&store);
        cache.refresh().await.unwrap();

        let err = cache.refresh_app("a").await.unwrap_err();
        assert!(matches!(err, EngineError::PolicyInvalid { .. }));
        assert_eq!(cache.get("a").await.unwrap().instance_min_count, 1);
    }

    #[tokio::test]
    async fn close_reaches_the_store() {
        let store = Arc::new(FakePolicyStore::new());
        let cache = cache(&store);
        cache.close().await.unwrap();
        assert_eq!(store.close_call_count(), 1);
    }
}
