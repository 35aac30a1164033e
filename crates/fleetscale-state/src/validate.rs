//! Policy parsing and validation.
//!
//! Invalid policies are rejected, never repaired. Conditions that are
//! suspicious but still evaluable (overlapping or already-expired one-off
//! windows) are reported as [`PolicyWarning`]s instead.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Parse a JSON policy document and validate it.
pub fn parse_policy(json: &str) -> StateResult<ScalingPolicy> {
    let policy: ScalingPolicy =
        serde_json::from_str(json).map_err(|e| StateError::Deserialize(e.to_string()))?;
    validate(&policy)?;
    Ok(policy)
}

/// Check the structural invariants of a policy.
pub fn validate(policy: &ScalingPolicy) -> StateResult<()> {
    check_bounds("default", policy.instance_min_count, policy.instance_max_count)?;

    for (i, rule) in policy.scaling_rules.iter().enumerate() {
        if rule.metric_type.trim().is_empty() {
            return Err(invalid(format!("scaling_rules[{i}]: metric_type is empty")));
        }
        if !rule.threshold.is_finite() {
            return Err(invalid(format!("scaling_rules[{i}]: threshold must be finite")));
        }
        if rule.adjustment.amount == 0 {
            return Err(invalid(format!("scaling_rules[{i}]: adjustment must not be zero")));
        }
    }

    if let Some(schedules) = &policy.schedules {
        timezone(schedules)?;
        for (i, limit) in schedules.limits.iter().enumerate() {
            check_bounds(
                &format!("limits[{i}]"),
                limit.instance_min_count,
                limit.instance_max_count,
            )?;
            check_window(i, &limit.window)?;
        }
    }

    Ok(())
}

/// Resolve the schedule timezone.
pub fn timezone(schedules: &Schedules) -> StateResult<Tz> {
    schedules
        .timezone
        .parse::<Tz>()
        .map_err(|_| invalid(format!("unknown timezone {:?}", schedules.timezone)))
}

fn check_bounds(what: &str, min: u32, max: u32) -> StateResult<()> {
    if min < 1 {
        return Err(invalid(format!("{what}: instance_min_count must be at least 1")));
    }
    if max < min {
        return Err(invalid(format!(
            "{what}: instance_max_count {max} is below instance_min_count {min}"
        )));
    }
    Ok(())
}

fn check_window(i: usize, window: &ScheduleWindow) -> StateResult<()> {
    match window {
        ScheduleWindow::Recurring {
            start_time,
            end_time,
            days_of_week,
            days_of_month,
            start_date,
            end_date,
        } => {
            if end_time <= start_time {
                return Err(invalid(format!("limits[{i}]: end_time must be after start_time")));
            }
            match (days_of_week.is_empty(), days_of_month.is_empty()) {
                (true, true) => {
                    return Err(invalid(format!(
                        "limits[{i}]: one of days_of_week or days_of_month is required"
                    )));
                }
                (false, false) => {
                    return Err(invalid(format!(
                        "limits[{i}]: days_of_week and days_of_month are mutually exclusive"
                    )));
                }
                _ => {}
            }
            if let Some(day) = days_of_week.iter().find(|d| !(1..=7).contains(*d)) {
                return Err(invalid(format!("limits[{i}]: day of week {day} out of range")));
            }
            if let Some(day) = days_of_month.iter().find(|d| !(1..=31).contains(*d)) {
                return Err(invalid(format!("limits[{i}]: day of month {day} out of range")));
            }
            if let (Some(start), Some(end)) = (start_date, end_date)
                && end < start
            {
                return Err(invalid(format!("limits[{i}]: end_date precedes start_date")));
            }
        }
        ScheduleWindow::SpecificDate {
            start_date_time,
            end_date_time,
        } => {
            if end_date_time <= start_date_time {
                return Err(invalid(format!(
                    "limits[{i}]: end_date_time must be after start_date_time"
                )));
            }
        }
    }
    Ok(())
}

fn invalid(msg: String) -> StateError {
    StateError::Invalid(msg)
}

// ── Warnings ──────────────────────────────────────────────────────

/// Non-fatal findings about an otherwise valid policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyWarning {
    /// Two one-off windows overlap; both limits are indices into `limits`.
    OverlappingSpecificDates { earlier: usize, later: usize },
    /// A one-off window ended before now and will never apply again.
    ExpiredSpecificDate { index: usize },
}

impl fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyWarning::OverlappingSpecificDates { earlier, later } => write!(
                f,
                "specific-date limits[{earlier}] and limits[{later}] overlap"
            ),
            PolicyWarning::ExpiredSpecificDate { index } => {
                write!(f, "specific-date limits[{index}] has already ended")
            }
        }
    }
}

/// Report overlapping and expired one-off windows.
///
/// Expects a policy that already passed [`validate`]; an unknown timezone
/// skips the expiry check.
pub fn lint(policy: &ScalingPolicy, now: DateTime<Utc>) -> Vec<PolicyWarning> {
    let Some(schedules) = &policy.schedules else {
        return Vec::new();
    };

    let mut windows: Vec<(usize, NaiveDateTime, NaiveDateTime)> = schedules
        .limits
        .iter()
        .enumerate()
        .filter_map(|(i, limit)| match limit.window {
            ScheduleWindow::SpecificDate {
                start_date_time,
                end_date_time,
            } => Some((i, start_date_time, end_date_time)),
            ScheduleWindow::Recurring { .. } => None,
        })
        .collect();
    windows.sort_by_key(|(i, start, _)| (*start, *i));

    // Sorted by start, so a window overlaps every earlier one whose end is
    // at or past its start. A window ending exactly where the next begins
    // counts as overlapping.
    let mut overlaps: Vec<(usize, usize)> = Vec::new();
    for (j, &(b, b_start, _)) in windows.iter().enumerate() {
        for &(a, _, a_end) in &windows[..j] {
            if a_end >= b_start {
                overlaps.push((a.min(b), a.max(b)));
            }
        }
    }
    overlaps.sort_unstable();

    let mut warnings: Vec<PolicyWarning> = overlaps
        .into_iter()
        .map(|(earlier, later)| PolicyWarning::OverlappingSpecificDates { earlier, later })
        .collect();

    if let Ok(tz) = timezone(schedules) {
        let local_now = now.with_timezone(&tz).naive_local();
        let mut expired: Vec<usize> = windows
            .iter()
            .filter(|(_, _, end)| *end <= local_now)
            .map(|(i, _, _)| *i)
            .collect();
        expired.sort_unstable();
        warnings.extend(
            expired
                .into_iter()
                .map(|index| PolicyWarning::ExpiredSpecificDate { index }),
        );
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn base_policy() -> ScalingPolicy {
        ScalingPolicy {
            instance_min_count: 1,
            instance_max_count: 5,
            scaling_rules: vec![ScalingRule {
                metric_type: "cpu".to_string(),
                operator: Operator::Gt,
                threshold: 80.0,
                adjustment: Adjustment::absolute(2),
                cool_down_secs: 300,
            }],
            schedules: None,
        }
    }

    fn at(date: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M").unwrap()
    }

    fn specific(start: &str, end: &str) -> ScheduledLimit {
        ScheduledLimit {
            window: ScheduleWindow::SpecificDate {
                start_date_time: at(start),
                end_date_time: at(end),
            },
            instance_min_count: 2,
            instance_max_count: 4,
        }
    }

    fn weekday_window() -> ScheduleWindow {
        ScheduleWindow::Recurring {
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            days_of_week: vec![1, 2, 3, 4, 5],
            days_of_month: vec![],
            start_date: None,
            end_date: None,
        }
    }

    fn with_limits(limits: Vec<ScheduledLimit>) -> ScalingPolicy {
        let mut policy = base_policy();
        policy.schedules = Some(Schedules {
            timezone: "UTC".to_string(),
            limits,
        });
        policy
    }

    #[test]
    fn valid_policy_passes() {
        assert!(validate(&base_policy()).is_ok());
    }

    #[test]
    fn rejects_zero_min() {
        let mut policy = base_policy();
        policy.instance_min_count = 0;
        assert!(matches!(validate(&policy), Err(StateError::Invalid(_))));
    }

    #[test]
    fn rejects_max_below_min() {
        let mut policy = base_policy();
        policy.instance_min_count = 4;
        policy.instance_max_count = 3;
        assert!(matches!(validate(&policy), Err(StateError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_adjustment_and_nan_threshold() {
        let mut policy = base_policy();
        policy.scaling_rules[0].adjustment = Adjustment::absolute(0);
        assert!(validate(&policy).is_err());

        let mut policy = base_policy();
        policy.scaling_rules[0].threshold = f64::NAN;
        assert!(validate(&policy).is_err());
    }

    #[test]
    fn rejects_inconsistent_override_range() {
        let mut limit = specific("2026-12-24T00:00", "2026-12-25T00:00");
        limit.instance_min_count = 6;
        limit.instance_max_count = 3;
        assert!(validate(&with_limits(vec![limit])).is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut policy = with_limits(vec![]);
        if let Some(s) = policy.schedules.as_mut() {
            s.timezone = "Mars/Olympus".to_string();
        }
        assert!(validate(&policy).is_err());
    }

    #[test]
    fn rejects_bad_recurring_windows() {
        let mut limit = ScheduledLimit {
            window: weekday_window(),
            instance_min_count: 5,
            instance_max_count: 10,
        };
        assert!(validate(&with_limits(vec![limit.clone()])).is_ok());

        if let ScheduleWindow::Recurring { end_time, .. } = &mut limit.window {
            *end_time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        }
        assert!(validate(&with_limits(vec![limit.clone()])).is_err());

        limit.window = weekday_window();
        if let ScheduleWindow::Recurring { days_of_month, .. } = &mut limit.window {
            days_of_month.push(15);
        }
        assert!(validate(&with_limits(vec![limit.clone()])).is_err());

        limit.window = weekday_window();
        if let ScheduleWindow::Recurring { days_of_week, .. } = &mut limit.window {
            days_of_week.push(8);
        }
        assert!(validate(&with_limits(vec![limit.clone()])).is_err());

        limit.window = weekday_window();
        if let ScheduleWindow::Recurring {
            start_date,
            end_date,
            ..
        } = &mut limit.window
        {
            *start_date = NaiveDate::from_ymd_opt(2026, 6, 1);
            *end_date = NaiveDate::from_ymd_opt(2026, 5, 1);
        }
        assert!(validate(&with_limits(vec![limit])).is_err());
    }

    #[test]
    fn rejects_specific_date_ending_before_start() {
        let limit = specific("2026-12-25T00:00", "2026-12-24T00:00");
        assert!(validate(&with_limits(vec![limit])).is_err());
    }

    #[test]
    fn parse_policy_distinguishes_malformed_from_invalid() {
        assert!(matches!(
            parse_policy("{not json"),
            Err(StateError::Deserialize(_))
        ));
        assert!(matches!(
            parse_policy(r#"{"instance_min_count": 3, "instance_max_count": 1}"#),
            Err(StateError::Invalid(_))
        ));
        assert!(parse_policy(r#"{"instance_min_count": 1, "instance_max_count": 1}"#).is_ok());
    }

    #[test]
    fn lint_reports_overlapping_specific_dates() {
        let policy = with_limits(vec![
            specific("2026-12-24T00:00", "2026-12-25T12:00"),
            specific("2026-12-25T00:00", "2026-12-26T00:00"),
            specific("2026-12-27T00:00", "2026-12-28T00:00"),
        ]);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let warnings = lint(&policy, now);
        assert_eq!(
            warnings,
            vec![PolicyWarning::OverlappingSpecificDates {
                earlier: 0,
                later: 1
            }]
        );
    }

    #[test]
    fn lint_reports_touching_windows_as_overlap() {
        let policy = with_limits(vec![
            specific("2026-12-24T00:00", "2026-12-25T00:00"),
            specific("2026-12-25T00:00", "2026-12-26T00:00"),
        ]);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            lint(&policy, now),
            vec![PolicyWarning::OverlappingSpecificDates {
                earlier: 0,
                later: 1
            }]
        );
    }

    #[test]
    fn lint_reports_every_window_inside_a_long_one() {
        let policy = with_limits(vec![
            specific("2026-12-01T00:00", "2026-12-31T00:00"),
            specific("2026-12-05T00:00", "2026-12-06T00:00"),
            specific("2026-12-10T00:00", "2026-12-11T00:00"),
        ]);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            lint(&policy, now),
            vec![
                PolicyWarning::OverlappingSpecificDates { earlier: 0, later: 1 },
                PolicyWarning::OverlappingSpecificDates { earlier: 0, later: 2 },
            ]
        );
    }

    #[test]
    fn lint_reports_equal_starts_as_overlap() {
        let policy = with_limits(vec![
            specific("2026-12-24T00:00", "2026-12-24T06:00"),
            specific("2026-12-24T00:00", "2026-12-24T03:00"),
        ]);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(lint(&policy, now).len(), 1);
    }

    #[test]
    fn lint_reports_expired_windows() {
        let policy = with_limits(vec![specific("2025-01-01T00:00", "2025-01-02T00:00")]);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            lint(&policy, now),
            vec![PolicyWarning::ExpiredSpecificDate { index: 0 }]
        );
    }
}
