//! Decision collector: per-application counters fed by the engine.
//!
//! Counters are atomics; the per-application map sits behind a std
//! `RwLock` because observer callbacks are synchronous.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use fleetscale_engine::{DecisionObserver, EngineError, RoundReport, ScalingDecision};

/// Decision reason codes, in exposition order.
pub const REASONS: [&str; 5] = ["no_rule_fired", "at_boundary", "cooldown", "scaled_up", "scaled_down"];

/// Per-application bucket.
#[derive(Default)]
struct AppMetrics {
    /// Indexed like [`REASONS`].
    decisions: [AtomicU64; REASONS.len()],
    failures: RwLock<BTreeMap<&'static str, u64>>,
    current_instances: AtomicU64,
    target_instances: AtomicU64,
    bounds_min: AtomicU64,
    bounds_max: AtomicU64,
}

/// Point-in-time view of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSnapshot {
    pub app_id: String,
    /// Decision count per reason code; every code is present.
    pub decisions: BTreeMap<&'static str, u64>,
    /// Failure count per error kind; only kinds seen so far.
    pub failures: BTreeMap<&'static str, u64>,
    pub current_instances: u64,
    pub target_instances: u64,
    pub bounds_min: u64,
    pub bounds_max: u64,
}

/// Point-in-time view of everything collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionSnapshot {
    pub rounds: u64,
    pub apps: Vec<AppSnapshot>,
}

/// Observer that counts decisions and failures per application.
#[derive(Default)]
pub struct DecisionMetrics {
    apps: RwLock<HashMap<String, Arc<AppMetrics>>>,
    rounds: AtomicU64,
}

impl DecisionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, app_id: &str) -> Arc<AppMetrics> {
        if let Some(m) = self.apps.read().unwrap_or_else(|e| e.into_inner()).get(app_id) {
            return m.clone();
        }
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        apps.entry(app_id.to_string())
            .or_insert_with(|| {
                debug!(%app_id, "tracking decision metrics");
                Arc::new(AppMetrics::default())
            })
            .clone()
    }

    /// Drop every application the round did not evaluate, so policies
    /// removed from the cache stop being exported.
    fn retain_evaluated(&self, report: &RoundReport) {
        let evaluated: HashSet<&str> = report
            .decisions
            .iter()
            .map(|d| d.app_id.as_str())
            .chain(report.failures.iter().map(|f| f.app_id.as_str()))
            .collect();
        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        apps.retain(|app_id, _| {
            let keep = evaluated.contains(app_id.as_str());
            if !keep {
                debug!(%app_id, "no longer tracked, dropping decision metrics");
            }
            keep
        });
    }

    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Snapshot of every tracked application, sorted by id.
    pub fn snapshot(&self) -> DecisionSnapshot {
        let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<AppSnapshot> = apps
            .iter()
            .map(|(app_id, m)| AppSnapshot {
                app_id: app_id.clone(),
                decisions: REASONS
                    .iter()
                    .zip(&m.decisions)
                    .map(|(reason, count)| (*reason, count.load(Ordering::Relaxed)))
                    .collect(),
                failures: m.failures.read().unwrap_or_else(|e| e.into_inner()).clone(),
                current_instances: m.current_instances.load(Ordering::Relaxed),
                target_instances: m.target_instances.load(Ordering::Relaxed),
                bounds_min: m.bounds_min.load(Ordering::Relaxed),
                bounds_max: m.bounds_max.load(Ordering::Relaxed),
            })
            .collect();
        out.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        DecisionSnapshot {
            rounds: self.rounds(),
            apps: out,
        }
    }
}

impl DecisionObserver for DecisionMetrics {
    fn on_decision(&self, decision: &ScalingDecision) {
        let m = self.bucket(&decision.app_id);
        if let Some(i) = REASONS.iter().position(|r| *r == decision.reason_code()) {
            m.decisions[i].fetch_add(1, Ordering::Relaxed);
        }
        m.current_instances
            .store(u64::from(decision.current_instances), Ordering::Relaxed);
        m.target_instances
            .store(u64::from(decision.target()), Ordering::Relaxed);
        m.bounds_min
            .store(u64::from(decision.bounds.min), Ordering::Relaxed);
        m.bounds_max
            .store(u64::from(decision.bounds.max), Ordering::Relaxed);
    }

    fn on_failure(&self, app_id: &str, error: &EngineError) {
        let m = self.bucket(app_id);
        let mut failures = m.failures.write().unwrap_or_else(|e| e.into_inner());
        *failures.entry(error.kind().as_str()).or_default() += 1;
    }

    fn on_round(&self, report: &RoundReport) {
        self.retain_evaluated(report);
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }
}
