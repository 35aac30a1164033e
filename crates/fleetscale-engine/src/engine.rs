//! Scaling engine: drives one evaluation cycle per tracked application per
//! tick, with a bounded worker pool and a separate policy refresh loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use fleetscale_state::{AppId, MetricSample};

use crate::cache::PolicyCache;
use crate::clock::{Clock, SystemClock};
use crate::cooldown::CooldownTracker;
use crate::decision::ScalingDecision;
use crate::dispatcher::{CycleInput, Dispatcher};
use crate::error::{EngineError, EngineResult, Stage};
use crate::health::{EngineHealth, HealthStatus};
use crate::observer::{DecisionObserver, NoopObserver};
use crate::source::{Actuator, MetricsSource};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub refresh_interval: Duration,
    /// Upper bound on concurrently evaluated applications.
    pub max_concurrency: usize,
    /// Bound on each metrics-source call.
    pub metric_timeout: Duration,
    /// Bound on each actuator call.
    pub actuation_timeout: Duration,
    /// Consecutive failures before health turns degraded.
    pub degraded_after: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(60),
            max_concurrency: 16,
            metric_timeout: Duration::from_secs(5),
            actuation_timeout: Duration::from_secs(10),
            degraded_after: 3,
        }
    }
}

/// A cycle that ended in an error.
#[derive(Debug)]
pub struct AppFailure {
    pub app_id: AppId,
    pub error: EngineError,
}

/// Everything one round produced.
#[derive(Debug, Default)]
pub struct RoundReport {
    pub decisions: Vec<ScalingDecision>,
    pub failures: Vec<AppFailure>,
    /// Applications dropped from the cache between listing and evaluation.
    pub skipped: Vec<AppId>,
}

impl RoundReport {
    pub fn evaluated(&self) -> usize {
        self.decisions.len() + self.failures.len()
    }

    pub fn scaled(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_scaled()).count()
    }

    /// True when at least one application was evaluated and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.failures.is_empty() && self.decisions.is_empty()
    }
}

/// The decision-engine orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScalingEngine {
    cache: Arc<PolicyCache>,
    metrics: Arc<dyn MetricsSource>,
    actuator: Arc<dyn Actuator>,
    dispatcher: Arc<Dispatcher>,
    observer: Arc<dyn DecisionObserver>,
    clock: Arc<dyn Clock>,
    health: EngineHealth,
    workers: Arc<Semaphore>,
    config: EngineConfig,
}

impl ScalingEngine {
    pub fn new(
        cache: Arc<PolicyCache>,
        metrics: Arc<dyn MetricsSource>,
        actuator: Arc<dyn Actuator>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            actuator.clone(),
            Arc::new(CooldownTracker::new()),
            config.actuation_timeout,
        );
        Self {
            cache,
            metrics,
            actuator,
            dispatcher: Arc::new(dispatcher),
            observer: Arc::new(NoopObserver),
            clock: Arc::new(SystemClock),
            health: EngineHealth::new(config.degraded_after),
            workers: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DecisionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        self.dispatcher.cooldowns()
    }

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthStatus> {
        self.health.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one cycle for one application.
    pub async fn evaluate(&self, app_id: &str) -> EngineResult<ScalingDecision> {
        let policy = self.cache.get(app_id).await?;

        let mut samples = Vec::new();
        for metric in policy.metric_names() {
            samples.push(self.fetch_sample(app_id, metric).await?);
        }
        let current_instances = self.current_instances(app_id).await?;

        self.dispatcher
            .dispatch(CycleInput {
                app_id,
                policy: &policy,
                samples: &samples,
                current_instances,
                now: self.clock.now(),
            })
            .await
    }

    async fn fetch_sample(&self, app_id: &str, metric: &str) -> EngineResult<MetricSample> {
        let timeout = self.config.metric_timeout;
        tokio::time::timeout(timeout, self.metrics.get_latest_sample(app_id, metric))
            .await
            .map_err(|_| EngineError::Timeout {
                stage: Stage::Metrics,
                after: timeout,
            })?
            .map_err(|e| EngineError::MetricUnavailable {
                app_id: app_id.to_string(),
                metric: metric.to_string(),
                reason: format!("{e:#}"),
            })
    }

    async fn current_instances(&self, app_id: &str) -> EngineResult<u32> {
        let timeout = self.config.actuation_timeout;
        tokio::time::timeout(timeout, self.actuator.instance_count(app_id))
            .await
            .map_err(|_| EngineError::Timeout {
                stage: Stage::Instances,
                after: timeout,
            })?
            .map_err(|e| EngineError::InstancesUnavailable {
                app_id: app_id.to_string(),
                reason: format!("{e:#}"),
            })
    }

    /// Evaluate every tracked application once, at most `max_concurrency`
    /// at a time. One application's failure never affects another's.
    pub async fn run_round(&self) -> RoundReport {
        let app_ids = self.cache.list_tracked_ids().await;
        let mut tasks = JoinSet::new();

        for app_id in app_ids {
            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = engine.workers.clone().acquire_owned().await.ok();
                let result = engine.evaluate(&app_id).await;
                (app_id, result)
            });
        }

        let mut report = RoundReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(decision))) => {
                    debug!(app_id = %decision.app_id, reason = decision.reason_code(), "decision");
                    self.observer.on_decision(&decision);
                    report.decisions.push(decision);
                }
                Ok((app_id, Err(EngineError::PolicyNotFound(_)))) => {
                    debug!(%app_id, "policy gone since listing, skipping");
                    report.skipped.push(app_id);
                }
                Ok((app_id, Err(error))) => {
                    warn!(%app_id, kind = error.kind().as_str(), error = %error, "evaluation failed");
                    self.observer.on_failure(&app_id, &error);
                    report.failures.push(AppFailure { app_id, error });
                }
                Err(e) => error!(error = %e, "evaluation task panicked"),
            }
        }

        self.health.record_round(report.all_failed());
        self.observer.on_round(&report);
        debug!(
            evaluated = report.evaluated(),
            scaled = report.scaled(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "round complete"
        );
        report
    }

    /// Run a round every `tick` until `shutdown` flips. A round in flight
    /// when shutdown arrives is abandoned.
    pub async fn run(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let apps = self.cache.list_tracked_ids().await.len();
        info!(tick_secs = tick.as_secs(), apps, "scaling engine started");
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.run_round() => {}
                        _ = shutdown.changed() => {
                            info!("scaling engine shutting down mid-round");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling engine shutting down");
                    break;
                }
            }
        }
    }

    /// Load policies once, then spawn the refresh loop and the tick loop.
    pub async fn start(&self, tick: Duration) -> EngineHandle {
        let initial = self.cache.refresh().await;
        self.health.record_refresh(initial.as_ref().err());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let refresher = {
            let cache = self.cache.clone();
            let health = self.health.clone();
            let interval = self.config.refresh_interval;
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { cache.run(interval, shutdown, &health).await })
        };
        let ticker = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run(tick, shutdown_rx).await })
        };

        EngineHandle {
            shutdown: shutdown_tx,
            tasks: vec![refresher, ticker],
        }
    }
}

/// Handle to a started engine.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal both loops and wait for them to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "engine task ended abnormally");
            }
        }
        info!("scaling engine stopped");
    }
}
