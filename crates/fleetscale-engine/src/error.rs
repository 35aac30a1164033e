//! Engine error types.
//!
//! Every error is scoped to one application's cycle or to one cache
//! refresh. None of them is fatal to the engine.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use fleetscale_state::{AppId, StateError};

/// External call a timeout happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PolicyStore,
    Metrics,
    Instances,
    Actuation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::PolicyStore => "policy store",
            Stage::Metrics => "metrics",
            Stage::Instances => "instance count",
            Stage::Actuation => "actuation",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while refreshing policies or evaluating an application.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no policy for application {0}")]
    PolicyNotFound(AppId),

    #[error("invalid policy for application {app_id}: {reason}")]
    PolicyInvalid { app_id: AppId, reason: String },

    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("metric {metric} unavailable for application {app_id}: {reason}")]
    MetricUnavailable {
        app_id: AppId,
        metric: String,
        reason: String,
    },

    #[error("instance count unavailable for application {app_id}: {reason}")]
    InstancesUnavailable { app_id: AppId, reason: String },

    #[error("actuation failed for application {app_id}: {reason}")]
    ActuationFailed { app_id: AppId, reason: String },

    #[error("{stage} call timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

/// Coarse classification used for reporting and health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PolicyNotFound,
    PolicyInvalid,
    StoreUnavailable,
    MetricUnavailable,
    InstancesUnavailable,
    ActuationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PolicyNotFound => "policy_not_found",
            ErrorKind::PolicyInvalid => "policy_invalid",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::MetricUnavailable => "metric_unavailable",
            ErrorKind::InstancesUnavailable => "instances_unavailable",
            ErrorKind::ActuationFailed => "actuation_failed",
        }
    }
}

impl EngineError {
    /// Classify the error; a timeout counts as a failure of its stage.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::PolicyNotFound(_) => ErrorKind::PolicyNotFound,
            EngineError::PolicyInvalid { .. } => ErrorKind::PolicyInvalid,
            EngineError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            EngineError::MetricUnavailable { .. } => ErrorKind::MetricUnavailable,
            EngineError::InstancesUnavailable { .. } => ErrorKind::InstancesUnavailable,
            EngineError::ActuationFailed { .. } => ErrorKind::ActuationFailed,
            EngineError::Timeout { stage, .. } => match stage {
                Stage::PolicyStore => ErrorKind::StoreUnavailable,
                Stage::Metrics => ErrorKind::MetricUnavailable,
                Stage::Instances => ErrorKind::InstancesUnavailable,
                Stage::Actuation => ErrorKind::ActuationFailed,
            },
        }
    }

    /// Map a store error for one application onto the engine taxonomy.
    pub fn from_store(app_id: &str, err: StateError) -> Self {
        if err.is_policy_error() {
            EngineError::PolicyInvalid {
                app_id: app_id.to_string(),
                reason: err.to_string(),
            }
        } else {
            EngineError::StoreUnavailable(err.to_string())
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_classify_as_their_stage() {
        let err = EngineError::Timeout {
            stage: Stage::Actuation,
            after: Duration::from_secs(5),
        };
        assert_eq!(err.kind(), ErrorKind::ActuationFailed);

        let err = EngineError::Timeout {
            stage: Stage::PolicyStore,
            after: Duration::from_secs(5),
        };
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn store_errors_split_by_cause() {
        let err = EngineError::from_store("app", StateError::Invalid("max < min".into()));
        assert_eq!(err.kind(), ErrorKind::PolicyInvalid);

        let err = EngineError::from_store("app", StateError::Closed);
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
