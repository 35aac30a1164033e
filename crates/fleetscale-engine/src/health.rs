//! Engine health: persistent failures surface as `Degraded`, never as a crash.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded { reason } => write!(f, "degraded: {reason}"),
        }
    }
}

#[derive(Default)]
struct Counters {
    refresh_failures: u32,
    failed_rounds: u32,
}

/// Tracks consecutive refresh failures and consecutive all-failed rounds.
///
/// Cloning shares the same counters and channel.
#[derive(Clone)]
pub struct EngineHealth {
    counters: Arc<Mutex<Counters>>,
    tx: Arc<watch::Sender<HealthStatus>>,
    degraded_after: u32,
}

impl EngineHealth {
    /// `degraded_after` consecutive failures of either kind mark the engine
    /// degraded. Zero is treated as one.
    pub fn new(degraded_after: u32) -> Self {
        let (tx, _) = watch::channel(HealthStatus::Healthy);
        Self {
            counters: Arc::new(Mutex::new(Counters::default())),
            tx: Arc::new(tx),
            degraded_after: degraded_after.max(1),
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.tx.subscribe()
    }

    /// Record the outcome of a bulk policy refresh.
    pub fn record_refresh(&self, error: Option<&EngineError>) {
        self.update(|c| match error {
            Some(_) => c.refresh_failures += 1,
            None => c.refresh_failures = 0,
        });
    }

    /// Record whether every evaluated application failed in a round.
    pub fn record_round(&self, all_failed: bool) {
        self.update(|c| {
            if all_failed {
                c.failed_rounds += 1;
            } else {
                c.failed_rounds = 0;
            }
        });
    }

    fn update(&self, f: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut counters);
        let next = self.evaluate(&counters);
        drop(counters);

        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            match &next {
                HealthStatus::Healthy => info!("engine recovered"),
                HealthStatus::Degraded { reason } => warn!(%reason, "engine degraded"),
            }
            *current = next;
            true
        });
    }

    fn evaluate(&self, c: &Counters) -> HealthStatus {
        if c.refresh_failures >= self.degraded_after {
            HealthStatus::Degraded {
                reason: format!("policy refresh failed {} consecutive times", c.refresh_failures),
            }
        } else if c.failed_rounds >= self.degraded_after {
            HealthStatus::Degraded {
                reason: format!("every application failed in {} consecutive rounds", c.failed_rounds),
            }
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_error() -> EngineError {
        EngineError::StoreUnavailable("down".into())
    }

    #[test]
    fn starts_healthy() {
        assert!(EngineHealth::new(3).status().is_healthy());
    }

    #[test]
    fn consecutive_refresh_failures_degrade_then_recover() {
        let health = EngineHealth::new(2);
        let err = store_error();

        health.record_refresh(Some(&err));
        assert!(health.status().is_healthy());
        health.record_refresh(Some(&err));
        assert!(matches!(health.status(), HealthStatus::Degraded { .. }));

        health.record_refresh(None);
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn a_success_resets_the_streak() {
        let health = EngineHealth::new(2);
        let err = store_error();
        health.record_refresh(Some(&err));
        health.record_refresh(None);
        health.record_refresh(Some(&err));
        assert!(health.status().is_healthy());
    }

    #[test]
    fn failed_rounds_degrade() {
        let health = EngineHealth::new(1);
        health.record_round(true);
        assert_eq!(health.status().to_string(), "degraded: every application failed in 1 consecutive rounds");
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let health = EngineHealth::new(1);
        let mut rx = health.subscribe();
        health.record_round(true);
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_healthy());
    }
}
