//! Domain types for fleetscale policies and metric samples.
//!
//! A `ScalingPolicy` is the operator-declared document for one application:
//! default instance bounds, threshold rules, and optional time-windowed
//! overrides. All types round-trip through JSON, which is how policies are
//! stored and handed out by bulk retrieval.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a tracked application.
pub type AppId = String;

/// Cooldown applied when a rule does not declare one.
pub const DEFAULT_COOL_DOWN_SECS: u64 = 300;

// ── Policy ────────────────────────────────────────────────────────

/// Scaling policy owned by a single application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    /// Default lower bound on instances (at least 1).
    pub instance_min_count: u32,
    /// Default upper bound on instances.
    pub instance_max_count: u32,
    /// Metric-driven rules, in declaration order.
    #[serde(default)]
    pub scaling_rules: Vec<ScalingRule>,
    /// Time-windowed bound overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<Schedules>,
}

impl ScalingPolicy {
    /// The policy's default `[min, max]` range.
    pub fn default_bounds(&self) -> InstanceBounds {
        InstanceBounds {
            min: self.instance_min_count,
            max: self.instance_max_count,
        }
    }

    /// Distinct metric names referenced by the rules, in sorted order.
    pub fn metric_names(&self) -> BTreeSet<&str> {
        self.scaling_rules
            .iter()
            .map(|r| r.metric_type.as_str())
            .collect()
    }
}

/// Inclusive instance-count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBounds {
    pub min: u32,
    pub max: u32,
}

impl InstanceBounds {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Size of the range; smaller is more restrictive.
    pub fn width(&self) -> u32 {
        self.max.saturating_sub(self.min)
    }

    /// Clamp a (possibly negative) instance count into the range.
    pub fn clamp(&self, count: i64) -> u32 {
        count.clamp(i64::from(self.min), i64::from(self.max)) as u32
    }

    pub fn contains(&self, count: u32) -> bool {
        (self.min..=self.max).contains(&count)
    }
}

impl fmt::Display for InstanceBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// ── Rules ─────────────────────────────────────────────────────────

/// A single threshold rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingRule {
    /// Metric the rule watches (e.g. "cpu", "memoryutil", "throughput").
    pub metric_type: String,
    pub operator: Operator,
    pub threshold: f64,
    /// Signed change, e.g. "+2" or "-25%".
    pub adjustment: Adjustment,
    /// Quiet period after an action produced by this rule.
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

impl ScalingRule {
    pub fn direction(&self) -> Direction {
        self.adjustment.direction()
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }

    /// Whether `value <operator> threshold` holds.
    pub fn fires(&self, value: f64) -> bool {
        self.operator.apply(value, self.threshold)
    }
}

fn default_cool_down_secs() -> u64 {
    DEFAULT_COOL_DOWN_SECS
}

/// Comparison used by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Scaling direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Signed instance adjustment, absolute or a percentage of the current count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Adjustment {
    /// Signed amount; never zero in a valid policy.
    pub amount: i32,
    /// When set, `amount` is a percentage of the current instance count.
    pub percent: bool,
}

impl Adjustment {
    pub fn absolute(amount: i32) -> Self {
        Self {
            amount,
            percent: false,
        }
    }

    pub fn percent(amount: i32) -> Self {
        Self {
            amount,
            percent: true,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.amount < 0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }

    /// Unsigned number of instances this adjustment moves by.
    ///
    /// Percentages round up and always move at least one instance.
    pub fn magnitude(&self, current_instances: u32) -> u32 {
        let amount = self.amount.unsigned_abs();
        if !self.percent {
            return amount;
        }
        let scaled = (u64::from(current_instances) * u64::from(amount)).div_ceil(100);
        scaled.clamp(1, u64::from(u32::MAX)) as u32
    }

    /// Signed instance delta for the given current count.
    pub fn delta(&self, current_instances: u32) -> i64 {
        let magnitude = i64::from(self.magnitude(current_instances));
        match self.direction() {
            Direction::Up => magnitude,
            Direction::Down => -magnitude,
        }
    }
}

impl FromStr for Adjustment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (body, percent) = match s.strip_suffix('%') {
            Some(body) => (body, true),
            None => (s, false),
        };
        if !body.starts_with(['+', '-']) {
            return Err(format!("adjustment {s:?} must start with '+' or '-'"));
        }
        let amount: i32 = body
            .parse()
            .map_err(|e| format!("adjustment {s:?}: {e}"))?;
        Ok(Self { amount, percent })
    }
}

impl TryFrom<String> for Adjustment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Adjustment> for String {
    fn from(adj: Adjustment) -> Self {
        adj.to_string()
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.amount)?;
        if self.percent {
            f.write_str("%")?;
        }
        Ok(())
    }
}

// ── Schedules ─────────────────────────────────────────────────────

/// Time-windowed overrides of the default bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedules {
    /// IANA timezone the windows are written in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Overrides in definition order; later entries are newer.
    #[serde(default)]
    pub limits: Vec<ScheduledLimit>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One scheduled override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledLimit {
    #[serde(flatten)]
    pub window: ScheduleWindow,
    pub instance_min_count: u32,
    pub instance_max_count: u32,
}

impl ScheduledLimit {
    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds {
            min: self.instance_min_count,
            max: self.instance_max_count,
        }
    }
}

/// When a scheduled override is in force.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleWindow {
    /// Repeats on the listed weekdays or days of the month.
    Recurring {
        #[serde(with = "hh_mm")]
        start_time: NaiveTime,
        /// Exclusive.
        #[serde(with = "hh_mm")]
        end_time: NaiveTime,
        /// ISO weekdays, 1 = Monday .. 7 = Sunday.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        days_of_week: Vec<u8>,
        /// Calendar days, 1 ..= 31.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        days_of_month: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<NaiveDate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<NaiveDate>,
    },
    /// A single one-off interval.
    SpecificDate {
        #[serde(with = "minute_date_time")]
        start_date_time: NaiveDateTime,
        /// Exclusive.
        #[serde(with = "minute_date_time")]
        end_date_time: NaiveDateTime,
    },
}

// ── Samples & records ─────────────────────────────────────────────

/// Latest observed value of one metric for one application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub app_id: AppId,
    pub metric_type: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Composite key for the samples table.
    pub fn table_key(&self) -> (&str, &str) {
        (&self.app_id, &self.metric_type)
    }
}

/// Serialized policy as handed out by bulk retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyRecord {
    pub app_id: AppId,
    pub policy_json: String,
}

/// Outcome of a create-or-update write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyWrite {
    Created,
    Updated,
}

impl fmt::Display for PolicyWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyWrite::Created => f.write_str("created"),
            PolicyWrite::Updated => f.write_str("updated"),
        }
    }
}

// ── Serde helpers ─────────────────────────────────────────────────

/// `HH:MM` times of day.
mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// `YYYY-MM-DDTHH:MM`, seconds optional on input.
mod minute_date_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
