//! fleetscale-engine: policy-driven scaling decisions.
//!
//! Every tick, each application with a cached policy goes through one
//! evaluation cycle: fetch its latest metric samples and current instance
//! count, then dispatch.
//!
//! # Decision Algorithm
//!
//! ```text
//! bounds   = narrowest active scheduled limit, else policy [min, max]
//! proposal = firing rule with the largest |adjustment| (up wins ties)
//!
//! no proposal                      -> NoOp(no_rule_fired)
//! target = clamp(current + delta, bounds)
//! target == current                -> NoOp(at_boundary)
//! cooldown running for direction   -> SuppressedByCooldown
//! actuator.set_instance_count(target), then record cooldown -> Scaled
//! ```
//!
//! The policy cache refreshes on its own interval and publishes whole
//! generations atomically. Store failures leave the previous generation in
//! place; repeated failures show up as [`HealthStatus::Degraded`].

pub mod cache;
pub mod clock;
pub mod cooldown;
pub mod decision;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod health;
pub mod observer;
pub mod schedule;
pub mod source;
pub mod threshold;

pub use cache::{CacheGeneration, PolicyCache, RefreshReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::{CooldownRecord, CooldownTracker};
pub use decision::{DecisionOutcome, NoOpReason, ScalingDecision};
pub use dispatcher::{CycleInput, Dispatcher};
pub use engine::{AppFailure, EngineConfig, EngineHandle, RoundReport, ScalingEngine};
pub use error::{EngineError, EngineResult, ErrorKind, Stage};
pub use health::{EngineHealth, HealthStatus};
pub use observer::{DecisionObserver, NoopObserver};
pub use schedule::{BoundsSource, EffectiveBounds, effective_bounds};
pub use source::{Actuator, MetricsSource};
pub use threshold::{Proposal, evaluate, evaluate_samples};
