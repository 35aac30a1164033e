//! Recording test double for [`PolicyStore`].
//!
//! Canned results can be set globally or for the n-th call of a method.
//! Every call is appended to one history list; all state sits behind a
//! single mutex.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateResult;
use crate::policy_store::PolicyStore;
use crate::types::{AppId, PolicyRecord, ScalingPolicy};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyStoreCall {
    GetAppIds,
    GetAppPolicy(AppId),
    RetrievePolicies,
    Close,
}

struct FakeState {
    calls: Vec<PolicyStoreCall>,
    app_ids: StateResult<BTreeSet<AppId>>,
    app_ids_on_call: HashMap<usize, StateResult<BTreeSet<AppId>>>,
    policies: HashMap<AppId, StateResult<Option<ScalingPolicy>>>,
    records: StateResult<Vec<PolicyRecord>>,
    records_on_call: HashMap<usize, StateResult<Vec<PolicyRecord>>>,
    close: StateResult<()>,
    delay: Option<Duration>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            app_ids: Ok(BTreeSet::new()),
            app_ids_on_call: HashMap::new(),
            policies: HashMap::new(),
            records: Ok(Vec::new()),
            records_on_call: HashMap::new(),
            close: Ok(()),
            delay: None,
        }
    }
}

impl FakeState {
    fn count(&self, call: &PolicyStoreCall) -> usize {
        self.calls
            .iter()
            .filter(|c| std::mem::discriminant(*c) == std::mem::discriminant(call))
            .count()
    }
}

#[derive(Default)]
pub struct FakePolicyStore {
    state: Mutex<FakeState>,
}

impl FakePolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Sleep this long inside every call (for timeout tests).
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.delay = delay);
    }

    pub fn get_app_ids_returns(&self, result: StateResult<BTreeSet<AppId>>) {
        self.with_state(|s| s.app_ids = result);
    }

    pub fn get_app_ids_returns_on_call(&self, call: usize, result: StateResult<BTreeSet<AppId>>) {
        self.with_state(|s| {
            s.app_ids_on_call.insert(call, result);
        });
    }

    /// Result for `get_app_policy(app_id)`; unknown ids yield `Ok(None)`.
    pub fn get_app_policy_returns(&self, app_id: &str, result: StateResult<Option<ScalingPolicy>>) {
        self.with_state(|s| {
            s.policies.insert(app_id.to_string(), result);
        });
    }

    pub fn retrieve_policies_returns(&self, result: StateResult<Vec<PolicyRecord>>) {
        self.with_state(|s| s.records = result);
    }

    pub fn retrieve_policies_returns_on_call(
        &self,
        call: usize,
        result: StateResult<Vec<PolicyRecord>>,
    ) {
        self.with_state(|s| {
            s.records_on_call.insert(call, result);
        });
    }

    pub fn close_returns(&self, result: StateResult<()>) {
        self.with_state(|s| s.close = result);
    }

    /// Full call history in invocation order.
    pub fn calls(&self) -> Vec<PolicyStoreCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn get_app_ids_call_count(&self) -> usize {
        self.with_state(|s| s.count(&PolicyStoreCall::GetAppIds))
    }

    pub fn get_app_policy_call_count(&self) -> usize {
        self.with_state(|s| s.count(&PolicyStoreCall::GetAppPolicy(String::new())))
    }

    /// Argument of the n-th `get_app_policy` call.
    pub fn get_app_policy_args_for_call(&self, call: usize) -> Option<AppId> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    PolicyStoreCall::GetAppPolicy(id) => Some(id.clone()),
                    _ => None,
                })
                .nth(call)
        })
    }

    pub fn retrieve_policies_call_count(&self) -> usize {
        self.with_state(|s| s.count(&PolicyStoreCall::RetrievePolicies))
    }

    pub fn close_call_count(&self) -> usize {
        self.with_state(|s| s.count(&PolicyStoreCall::Close))
    }

    /// Record a call and pick its result under the lock.
    fn invoke<T>(
        &self,
        call: PolicyStoreCall,
        pick: impl FnOnce(&mut FakeState, usize) -> T,
    ) -> (T, Option<Duration>) {
        self.with_state(|s| {
            let index = s.count(&call);
            s.calls.push(call);
            (pick(s, index), s.delay)
        })
    }

    async fn pause(delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Serialize a policy into the record form bulk retrieval returns.
pub fn record_for(app_id: &str, policy: &ScalingPolicy) -> PolicyRecord {
    PolicyRecord {
        app_id: app_id.to_string(),
        policy_json: serde_json::to_string(policy).expect("policy serializes"),
    }
}

#[async_trait]
impl PolicyStore for FakePolicyStore {
    async fn get_app_ids(&self) -> StateResult<BTreeSet<AppId>> {
        let (result, delay) = self.invoke(PolicyStoreCall::GetAppIds, |s, i| {
            s.app_ids_on_call
                .remove(&i)
                .unwrap_or_else(|| s.app_ids.clone())
        });
        Self::pause(delay).await;
        result
    }

    async fn get_app_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        let (result, delay) = self.invoke(PolicyStoreCall::GetAppPolicy(app_id.to_string()), |s, _| {
            s.policies.get(app_id).cloned().unwrap_or(Ok(None))
        });
        Self::pause(delay).await;
        result
    }

    async fn retrieve_policies(&self) -> StateResult<Vec<PolicyRecord>> {
        let (result, delay) = self.invoke(PolicyStoreCall::RetrievePolicies, |s, i| {
            s.records_on_call
                .remove(&i)
                .unwrap_or_else(|| s.records.clone())
        });
        Self::pause(delay).await;
        result
    }

    async fn close(&self) -> StateResult<()> {
        let (result, _) = self.invoke(PolicyStoreCall::Close, |s, _| s.close.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;

    #[tokio::test]
    async fn records_calls_and_arguments() {
        let fake = FakePolicyStore::new();
        fake.get_app_ids().await.unwrap();
        fake.get_app_policy("app-1").await.unwrap();
        fake.get_app_policy("app-2").await.unwrap();
        fake.close().await.unwrap();

        assert_eq!(fake.get_app_ids_call_count(), 1);
        assert_eq!(fake.get_app_policy_call_count(), 2);
        assert_eq!(fake.get_app_policy_args_for_call(1).as_deref(), Some("app-2"));
        assert_eq!(fake.close_call_count(), 1);
        assert_eq!(
            fake.calls(),
            vec![
                PolicyStoreCall::GetAppIds,
                PolicyStoreCall::GetAppPolicy("app-1".to_string()),
                PolicyStoreCall::GetAppPolicy("app-2".to_string()),
                PolicyStoreCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn on_call_results_override_default() {
        let fake = FakePolicyStore::new();
        fake.retrieve_policies_returns(Ok(vec![PolicyRecord {
            app_id: "a".to_string(),
            policy_json: "{}".to_string(),
        }]));
        fake.retrieve_policies_returns_on_call(
            1,
            Err(StateError::Unavailable("connection refused".to_string())),
        );

        assert_eq!(fake.retrieve_policies().await.unwrap().len(), 1);
        assert!(fake.retrieve_policies().await.is_err());
        assert_eq!(fake.retrieve_policies().await.unwrap().len(), 1);
        assert_eq!(fake.retrieve_policies_call_count(), 3);
    }

    #[tokio::test]
    async fn unknown_app_policy_is_none() {
        let fake = FakePolicyStore::new();
        assert!(fake.get_app_policy("ghost").await.unwrap().is_none());
    }
}
