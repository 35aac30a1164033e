//! Collaborator seams: where samples come from and where scaling goes.
//!
//! Both traits return `anyhow::Result`; the engine maps failures onto its
//! own taxonomy per stage. `StateStore` implements both so a single redb
//! file can act as the sample inbox and the desired-count outbox.

use anyhow::anyhow;
use async_trait::async_trait;

use fleetscale_state::{MetricSample, StateStore};

/// Source of the latest metric value per application.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_latest_sample(&self, app_id: &str, metric_type: &str) -> anyhow::Result<MetricSample>;
}

/// The platform that owns instance counts.
///
/// `set_instance_count` must be idempotent for a given target.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn instance_count(&self, app_id: &str) -> anyhow::Result<u32>;

    async fn set_instance_count(&self, app_id: &str, target: u32) -> anyhow::Result<()>;
}

#[async_trait]
impl MetricsSource for StateStore {
    async fn get_latest_sample(&self, app_id: &str, metric_type: &str) -> anyhow::Result<MetricSample> {
        let store = self.clone();
        let (app, metric) = (app_id.to_string(), metric_type.to_string());
        tokio::task::spawn_blocking(move || store.latest_sample(&app, &metric))
            .await??
            .ok_or_else(|| anyhow!("no {metric_type} sample recorded for {app_id}"))
    }
}

#[async_trait]
impl Actuator for StateStore {
    async fn instance_count(&self, app_id: &str) -> anyhow::Result<u32> {
        let store = self.clone();
        let app = app_id.to_string();
        tokio::task::spawn_blocking(move || store.instance_count(&app))
            .await??
            .ok_or_else(|| anyhow!("no instance count recorded for {app_id}"))
    }

    async fn set_instance_count(&self, app_id: &str, target: u32) -> anyhow::Result<()> {
        let store = self.clone();
        let app = app_id.to_string();
        tokio::task::spawn_blocking(move || store.set_instance_count(&app, target)).await??;
        Ok(())
    }
}
