//! Observability hook: one event per application per cycle.

use crate::decision::ScalingDecision;
use crate::engine::RoundReport;
use crate::error::EngineError;

/// Receives every decision the engine makes.
///
/// Called from the round collector, one call at a time; implementations
/// should return quickly.
pub trait DecisionObserver: Send + Sync {
    fn on_decision(&self, decision: &ScalingDecision);

    /// A cycle that ended in an error instead of a decision.
    fn on_failure(&self, _app_id: &str, _error: &EngineError) {}

    /// Called once after every round, after all per-app events.
    fn on_round(&self, _report: &RoundReport) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DecisionObserver for NoopObserver {
    fn on_decision(&self, _decision: &ScalingDecision) {}
}
