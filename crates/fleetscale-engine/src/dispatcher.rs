//! Decision dispatcher: merges schedule and threshold results into one
//! clamped, cooldown-checked action and hands it to the actuator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use fleetscale_state::{Direction, MetricSample, ScalingPolicy};

use crate::cooldown::CooldownTracker;
use crate::decision::{DecisionOutcome, NoOpReason, ScalingDecision};
use crate::error::{EngineError, EngineResult, Stage};
use crate::schedule::effective_bounds;
use crate::source::Actuator;
use crate::threshold::evaluate_samples;

/// Everything one cycle knows about one application.
#[derive(Debug, Clone, Copy)]
pub struct CycleInput<'a> {
    pub app_id: &'a str,
    pub policy: &'a ScalingPolicy,
    pub samples: &'a [MetricSample],
    pub current_instances: u32,
    pub now: DateTime<Utc>,
}

pub struct Dispatcher {
    actuator: Arc<dyn Actuator>,
    cooldowns: Arc<CooldownTracker>,
    actuation_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        cooldowns: Arc<CooldownTracker>,
        actuation_timeout: Duration,
    ) -> Self {
        Self {
            actuator,
            cooldowns,
            actuation_timeout,
        }
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Run one cycle for one application.
    ///
    /// Returns the decision, or `ActuationFailed` / `Timeout` when the
    /// actuator rejected the change; in that case no cooldown is recorded.
    pub async fn dispatch(&self, input: CycleInput<'_>) -> EngineResult<ScalingDecision> {
        let CycleInput {
            app_id,
            policy,
            samples,
            current_instances,
            now,
        } = input;

        let effective = effective_bounds(policy, now);
        let decision = |outcome, rule_index| ScalingDecision {
            app_id: app_id.to_string(),
            current_instances,
            bounds: effective.bounds,
            bounds_source: effective.source,
            outcome,
            rule_index,
            decided_at: now,
        };

        let Some(proposal) = evaluate_samples(&policy.scaling_rules, samples, current_instances) else {
            return Ok(decision(DecisionOutcome::NoOp(NoOpReason::NoRuleFired), None));
        };
        let rule_index = Some(proposal.rule_index);

        let target = effective
            .bounds
            .clamp(i64::from(current_instances) + proposal.delta);
        if target == current_instances {
            debug!(%app_id, current_instances, bounds = %effective.bounds, "proposal saturated at bound");
            return Ok(decision(DecisionOutcome::NoOp(NoOpReason::AtBoundary), rule_index));
        }

        // Clamping can reverse a proposal when the count sits outside the
        // bounds; the cooldown follows the movement that will actually happen.
        let direction = if target > current_instances {
            Direction::Up
        } else {
            Direction::Down
        };

        let mut guard = self.cooldowns.lock(app_id).await;
        if let Some(remaining) = guard.remaining(direction, proposal.cool_down, now) {
            debug!(%app_id, %direction, ?remaining, "suppressed by cooldown");
            return Ok(decision(
                DecisionOutcome::SuppressedByCooldown {
                    direction,
                    proposed_target: target,
                    remaining,
                },
                rule_index,
            ));
        }

        let actuation = tokio::time::timeout(
            self.actuation_timeout,
            self.actuator.set_instance_count(app_id, target),
        )
        .await;
        match actuation {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%app_id, target, error = %e, "scaling action failed");
                return Err(EngineError::ActuationFailed {
                    app_id: app_id.to_string(),
                    reason: format!("{e:#}"),
                });
            }
            Err(_) => {
                warn!(%app_id, target, timeout = ?self.actuation_timeout, "scaling action timed out");
                return Err(EngineError::Timeout {
                    stage: Stage::Actuation,
                    after: self.actuation_timeout,
                });
            }
        }
        // No await between a successful actuation and this record, so a
        // cancelled cycle cannot leave one without the other.
        guard.record(direction, now);

        info!(
            %app_id,
            from = current_instances,
            to = target,
            %direction,
            metric = %proposal.metric_type,
            value = proposal.value,
            bounds = %effective.bounds,
            "scaled"
        );
        Ok(decision(DecisionOutcome::Scaled { direction, target }, rule_index))
    }
}
