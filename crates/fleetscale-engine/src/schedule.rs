//! Schedule evaluation: which instance bounds are in force right now.
//!
//! Windows are matched against local time in the schedule's timezone. When
//! several windows are active the narrowest range wins, and among equally
//! narrow ranges the most recently defined entry wins.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use fleetscale_state::{InstanceBounds, ScalingPolicy, ScheduleWindow, Schedules, validate};

/// Where the effective bounds came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsSource {
    /// The policy's default range.
    Default,
    /// `schedules.limits[index]`.
    Scheduled { index: usize },
}

/// Bounds in force for one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveBounds {
    pub bounds: InstanceBounds,
    pub source: BoundsSource,
}

/// Resolve the bounds in force for `policy` at `now`.
pub fn effective_bounds(policy: &ScalingPolicy, now: DateTime<Utc>) -> EffectiveBounds {
    let fallback = EffectiveBounds {
        bounds: policy.default_bounds(),
        source: BoundsSource::Default,
    };
    let Some(schedules) = &policy.schedules else {
        return fallback;
    };

    let local = local_time(schedules, now);
    let mut best: Option<EffectiveBounds> = None;
    for index in active_limits(schedules, local) {
        let bounds = schedules.limits[index].bounds();
        // `<=` lets a later entry of equal width replace an earlier one.
        if best.is_none_or(|b| bounds.width() <= b.bounds.width()) {
            best = Some(EffectiveBounds {
                bounds,
                source: BoundsSource::Scheduled { index },
            });
        }
    }
    best.unwrap_or(fallback)
}

/// Indices of the limits whose window contains `local`, in definition order.
pub fn active_limits(schedules: &Schedules, local: NaiveDateTime) -> Vec<usize> {
    schedules
        .limits
        .iter()
        .enumerate()
        .filter(|(_, limit)| window_contains(&limit.window, local))
        .map(|(i, _)| i)
        .collect()
}

/// Whether a window covers the given local time. End times are exclusive.
pub fn window_contains(window: &ScheduleWindow, local: NaiveDateTime) -> bool {
    match window {
        ScheduleWindow::SpecificDate {
            start_date_time,
            end_date_time,
        } => *start_date_time <= local && local < *end_date_time,
        ScheduleWindow::Recurring {
            start_time,
            end_time,
            days_of_week,
            days_of_month,
            start_date,
            end_date,
        } => {
            let date = local.date();
            if start_date.is_some_and(|start| date < start) || end_date.is_some_and(|end| date > end) {
                return false;
            }
            let day_matches = if !days_of_week.is_empty() {
                let weekday = date.weekday().number_from_monday() as u8;
                days_of_week.contains(&weekday)
            } else {
                days_of_month.contains(&(date.day() as u8))
            };
            let time = local.time();
            day_matches && *start_time <= time && time < *end_time
        }
    }
}

fn local_time(schedules: &Schedules, now: DateTime<Utc>) -> NaiveDateTime {
    let tz = validate::timezone(schedules).unwrap_or_else(|err| {
        warn!(error = %err, "falling back to UTC for schedule evaluation");
        Tz::UTC
    });
    now.with_timezone(&tz).naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use fleetscale_state::ScheduledLimit;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn recurring(start: NaiveTime, end: NaiveTime, days_of_week: Vec<u8>, min: u32, max: u32) -> ScheduledLimit {
        ScheduledLimit {
            window: ScheduleWindow::Recurring {
                start_time: start,
                end_time: end,
                days_of_week,
                days_of_month: vec![],
                start_date: None,
                end_date: None,
            },
            instance_min_count: min,
            instance_max_count: max,
        }
    }

    fn specific(start: &str, end: &str, min: u32, max: u32) -> ScheduledLimit {
        let parse = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").unwrap();
        ScheduledLimit {
            window: ScheduleWindow::SpecificDate {
                start_date_time: parse(start),
                end_date_time: parse(end),
            },
            instance_min_count: min,
            instance_max_count: max,
        }
    }

    fn policy(timezone: &str, limits: Vec<ScheduledLimit>) -> ScalingPolicy {
        ScalingPolicy {
            instance_min_count: 1,
            instance_max_count: 4,
            scaling_rules: vec![],
            schedules: Some(Schedules {
                timezone: timezone.to_string(),
                limits,
            }),
        }
    }

    const EVERY_DAY: [u8; 7] = [1, 2, 3, 4, 5, 6, 7];

    #[test]
    fn no_schedules_uses_defaults() {
        let mut p = policy("UTC", vec![]);
        p.schedules = None;
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let eff = effective_bounds(&p, now);
        assert_eq!(eff.bounds, InstanceBounds::new(1, 4));
        assert_eq!(eff.source, BoundsSource::Default);
    }

    #[test]
    fn active_recurring_window_overrides_defaults() {
        let p = policy("UTC", vec![recurring(hm(9, 0), hm(17, 0), EVERY_DAY.to_vec(), 5, 10)]);

        let inside = Utc.with_ymd_and_hms(2026, 10, 19, 10, 30, 0).unwrap();
        assert_eq!(effective_bounds(&p, inside).bounds, InstanceBounds::new(5, 10));

        let at_end = Utc.with_ymd_and_hms(2026, 10, 19, 17, 0, 0).unwrap();
        assert_eq!(effective_bounds(&p, at_end).source, BoundsSource::Default);
    }

    #[test]
    fn weekday_filter_is_respected() {
        // 2026-10-19 is a Monday; 2026-10-24 is a Saturday.
        let p = policy("UTC", vec![recurring(hm(0, 0), hm(23, 59), vec![1, 2, 3, 4, 5], 2, 3)]);
        let monday = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2026, 10, 24, 12, 0, 0).unwrap();
        assert_eq!(effective_bounds(&p, monday).bounds, InstanceBounds::new(2, 3));
        assert_eq!(effective_bounds(&p, saturday).source, BoundsSource::Default);
    }

    #[test]
    fn days_of_month_and_date_range() {
        let limit = ScheduledLimit {
            window: ScheduleWindow::Recurring {
                start_time: hm(0, 0),
                end_time: hm(23, 0),
                days_of_week: vec![],
                days_of_month: vec![1, 15],
                start_date: NaiveDate::from_ymd_opt(2026, 11, 1),
                end_date: None,
            },
            instance_min_count: 3,
            instance_max_count: 3,
        };
        let p = policy("UTC", vec![limit]);

        let before_range = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();
        let in_range = Utc.with_ymd_and_hms(2026, 11, 15, 12, 0, 0).unwrap();
        let wrong_day = Utc.with_ymd_and_hms(2026, 11, 16, 12, 0, 0).unwrap();
        assert_eq!(effective_bounds(&p, before_range).source, BoundsSource::Default);
        assert_eq!(effective_bounds(&p, in_range).bounds, InstanceBounds::new(3, 3));
        assert_eq!(effective_bounds(&p, wrong_day).source, BoundsSource::Default);
    }

    #[test]
    fn windows_are_evaluated_in_schedule_timezone() {
        // 07:30 UTC is 09:30 in Berlin during summer time.
        let p = policy(
            "Europe/Berlin",
            vec![recurring(hm(9, 0), hm(17, 0), EVERY_DAY.to_vec(), 5, 10)],
        );
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 7, 30, 0).unwrap();
        assert_eq!(effective_bounds(&p, now).bounds, InstanceBounds::new(5, 10));
    }

    #[test]
    fn narrowest_active_range_wins() {
        let p = policy(
            "UTC",
            vec![
                recurring(hm(0, 0), hm(23, 59), EVERY_DAY.to_vec(), 2, 10),
                specific("2026-10-19T00:00", "2026-10-20T00:00", 4, 6),
            ],
        );
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let eff = effective_bounds(&p, now);
        assert_eq!(eff.bounds, InstanceBounds::new(4, 6));
        assert_eq!(eff.source, BoundsSource::Scheduled { index: 1 });
    }

    #[test]
    fn equal_width_prefers_most_recent_entry() {
        let p = policy(
            "UTC",
            vec![
                specific("2026-10-19T00:00", "2026-10-20T00:00", 6, 8),
                recurring(hm(0, 0), hm(23, 59), EVERY_DAY.to_vec(), 2, 4),
            ],
        );
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let eff = effective_bounds(&p, now);
        assert_eq!(eff.bounds, InstanceBounds::new(2, 4));
        assert_eq!(eff.source, BoundsSource::Scheduled { index: 1 });
    }

    #[test]
    fn evaluation_is_idempotent() {
        let p = policy("UTC", vec![recurring(hm(9, 0), hm(17, 0), EVERY_DAY.to_vec(), 5, 10)]);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        assert_eq!(effective_bounds(&p, now), effective_bounds(&p, now));
    }
}
