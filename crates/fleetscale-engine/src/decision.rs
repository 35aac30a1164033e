//! The per-cycle result handed to observers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fleetscale_state::{AppId, Direction, InstanceBounds};

use crate::schedule::BoundsSource;

/// Why a cycle ended without actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// No rule fired.
    NoRuleFired,
    /// A rule fired but the clamped target equals the current count.
    AtBoundary,
}

/// What a cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    NoOp(NoOpReason),
    /// A change was warranted but the cooldown for its direction is running.
    SuppressedByCooldown {
        direction: Direction,
        proposed_target: u32,
        remaining: Duration,
    },
    /// The actuator accepted the new count.
    Scaled { direction: Direction, target: u32 },
}

/// One application's decision for one cycle. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingDecision {
    pub app_id: AppId,
    pub current_instances: u32,
    /// Bounds in force for this cycle.
    pub bounds: InstanceBounds,
    pub bounds_source: BoundsSource,
    pub outcome: DecisionOutcome,
    /// Index of the rule that drove the proposal, if one fired.
    pub rule_index: Option<usize>,
    pub decided_at: DateTime<Utc>,
}

impl ScalingDecision {
    /// Instance count after this cycle.
    pub fn target(&self) -> u32 {
        match self.outcome {
            DecisionOutcome::Scaled { target, .. } => target,
            _ => self.current_instances,
        }
    }

    /// Signed change actually applied; zero unless scaled.
    pub fn adjustment(&self) -> i64 {
        i64::from(self.target()) - i64::from(self.current_instances)
    }

    pub fn is_scaled(&self) -> bool {
        matches!(self.outcome, DecisionOutcome::Scaled { .. })
    }

    /// Stable label for logs and metrics.
    pub fn reason_code(&self) -> &'static str {
        match &self.outcome {
            DecisionOutcome::NoOp(NoOpReason::NoRuleFired) => "no_rule_fired",
            DecisionOutcome::NoOp(NoOpReason::AtBoundary) => "at_boundary",
            DecisionOutcome::SuppressedByCooldown { .. } => "cooldown",
            DecisionOutcome::Scaled {
                direction: Direction::Up,
                ..
            } => "scaled_up",
            DecisionOutcome::Scaled {
                direction: Direction::Down,
                ..
            } => "scaled_down",
        }
    }
}

impl fmt::Display for ScalingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} -> {}, bounds {})",
            self.app_id,
            self.reason_code(),
            self.current_instances,
            self.target(),
            self.bounds
        )
    }
}
