//! Cooldown tracker: per-application quiet periods between scaling actions.
//!
//! Each application gets its own slot behind its own async mutex. Holding a
//! [`CooldownGuard`] serializes every other eligibility check for that
//! application, so check, actuate, and record happen as one unit and two
//! concurrent cycles can never both pass the check.
//!
//! Cooldowns are tracked per direction: a scale-up is held back only by the
//! last scale-up, a scale-down only by the last scale-down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use fleetscale_state::{AppId, Direction};

/// Last scaling action taken for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownRecord {
    pub last_action_time: DateTime<Utc>,
    pub last_direction: Direction,
    last_scale_up: Option<DateTime<Utc>>,
    last_scale_down: Option<DateTime<Utc>>,
}

impl CooldownRecord {
    fn new(direction: Direction, at: DateTime<Utc>) -> Self {
        let mut record = Self {
            last_action_time: at,
            last_direction: direction,
            last_scale_up: None,
            last_scale_down: None,
        };
        record.update(direction, at);
        record
    }

    fn update(&mut self, direction: Direction, at: DateTime<Utc>) {
        self.last_action_time = at;
        self.last_direction = direction;
        match direction {
            Direction::Up => self.last_scale_up = Some(at),
            Direction::Down => self.last_scale_down = Some(at),
        }
    }

    /// When the last action in `direction` happened, if any.
    pub fn last_action(&self, direction: Direction) -> Option<DateTime<Utc>> {
        match direction {
            Direction::Up => self.last_scale_up,
            Direction::Down => self.last_scale_down,
        }
    }
}

type Slot = Arc<Mutex<Option<CooldownRecord>>>;

/// Per-application cooldown bookkeeping.
#[derive(Default)]
pub struct CooldownTracker {
    slots: Mutex<HashMap<AppId, Slot>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive hold of one application's cooldown state.
    pub async fn lock(&self, app_id: &str) -> CooldownGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(app_id.to_string()).or_default().clone()
        };
        CooldownGuard {
            slot: slot.lock_owned().await,
        }
    }

    /// Whether an action in `direction` is allowed at `now`.
    pub async fn is_eligible(
        &self,
        app_id: &str,
        direction: Direction,
        cool_down: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.lock(app_id).await.is_eligible(direction, cool_down, now)
    }

    /// Record a dispatched action.
    pub async fn record(&self, app_id: &str, direction: Direction, now: DateTime<Utc>) {
        self.lock(app_id).await.record(direction, now);
    }

    /// Snapshot of an application's record.
    pub async fn get(&self, app_id: &str) -> Option<CooldownRecord> {
        let slot = self.slots.lock().await.get(app_id).cloned()?;
        slot.lock().await.clone()
    }
}

/// Exclusive access to one application's cooldown record.
pub struct CooldownGuard {
    slot: OwnedMutexGuard<Option<CooldownRecord>>,
}

impl CooldownGuard {
    pub fn record_snapshot(&self) -> Option<&CooldownRecord> {
        self.slot.as_ref()
    }

    /// Time left before an action in `direction` is allowed; `None` if allowed now.
    pub fn remaining(&self, direction: Direction, cool_down: Duration, now: DateTime<Utc>) -> Option<Duration> {
        if cool_down.is_zero() {
            return None;
        }
        let last = self.slot.as_ref()?.last_action(direction)?;
        let cool_down = TimeDelta::from_std(cool_down).unwrap_or(TimeDelta::MAX);
        let elapsed = now.signed_duration_since(last);
        if elapsed >= cool_down {
            return None;
        }
        // A clock that went backwards leaves the full cooldown outstanding.
        let left = cool_down - elapsed.max(TimeDelta::zero());
        Some(left.to_std().unwrap_or(Duration::MAX))
    }

    pub fn is_eligible(&self, direction: Direction, cool_down: Duration, now: DateTime<Utc>) -> bool {
        self.remaining(direction, cool_down, now).is_none()
    }

    /// Record an action. Call only after the actuator accepted it.
    pub fn record(&mut self, direction: Direction, now: DateTime<Utc>) {
        match self.slot.as_mut() {
            Some(record) => record.update(direction, now),
            None => *self.slot = Some(CooldownRecord::new(direction, now)),
        }
    }
}
