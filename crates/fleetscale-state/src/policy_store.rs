//! The policy store seam consumed by the scaling engine.
//!
//! `get_app_policy` returns `Ok(None)` for an application without a
//! policy; that is distinct from a transport or parse error.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::types::{AppId, PolicyRecord, ScalingPolicy};

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every application id the store currently tracks.
    async fn get_app_ids(&self) -> StateResult<BTreeSet<AppId>>;

    /// One application's parsed and validated policy.
    async fn get_app_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>>;

    /// All policies as raw records; callers parse and validate each one.
    async fn retrieve_policies(&self) -> StateResult<Vec<PolicyRecord>>;

    /// Release underlying resources. Called once at shutdown.
    async fn close(&self) -> StateResult<()>;
}

#[async_trait]
impl PolicyStore for StateStore {
    async fn get_app_ids(&self) -> StateResult<BTreeSet<AppId>> {
        let store = self.clone();
        blocking(move || store.list_app_ids()).await
    }

    async fn get_app_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        let store = self.clone();
        let app_id = app_id.to_string();
        blocking(move || store.get_policy(&app_id)).await
    }

    async fn retrieve_policies(&self) -> StateResult<Vec<PolicyRecord>> {
        let store = self.clone();
        blocking(move || store.list_policy_records()).await
    }

    async fn close(&self) -> StateResult<()> {
        StateStore::close(self);
        Ok(())
    }
}

/// Run a redb call off the async worker threads.
async fn blocking<T, F>(f: F) -> StateResult<T>
where
    F: FnOnce() -> StateResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StateError::Unavailable(e.to_string()))?
}
