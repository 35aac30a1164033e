//! Threshold evaluation: which rule, if any, wants to move the instance count.
//!
//! Pure functions of their inputs. When several rules fire, the one with the
//! larger absolute adjustment wins; on equal magnitude scale-up beats
//! scale-down, and among equals the earlier rule is kept.

use std::time::Duration;

use fleetscale_state::{Direction, MetricSample, ScalingRule};

/// A firing rule's requested change.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// Index of the winning rule in the policy.
    pub rule_index: usize,
    pub direction: Direction,
    /// Signed instance delta.
    pub delta: i64,
    /// Quiet period declared by the winning rule.
    pub cool_down: Duration,
    pub metric_type: String,
    pub value: f64,
}

impl Proposal {
    pub fn magnitude(&self) -> u64 {
        self.delta.unsigned_abs()
    }

    /// Whether `self` takes precedence over `other`.
    fn beats(&self, other: &Proposal) -> bool {
        match self.magnitude().cmp(&other.magnitude()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                self.direction == Direction::Up && other.direction == Direction::Down
            }
        }
    }
}

/// Evaluate the rules against one sample. `None` means no rule fired.
pub fn evaluate(rules: &[ScalingRule], sample: &MetricSample, current_instances: u32) -> Option<Proposal> {
    evaluate_samples(rules, std::slice::from_ref(sample), current_instances)
}

/// Evaluate the rules against every sample, applying one tie-break across
/// all of them.
pub fn evaluate_samples(
    rules: &[ScalingRule],
    samples: &[MetricSample],
    current_instances: u32,
) -> Option<Proposal> {
    let mut best: Option<Proposal> = None;

    for (rule_index, rule) in rules.iter().enumerate() {
        let Some(sample) = samples.iter().find(|s| s.metric_type == rule.metric_type) else {
            continue;
        };
        if !rule.fires(sample.value) {
            continue;
        }

        let candidate = Proposal {
            rule_index,
            direction: rule.direction(),
            delta: rule.adjustment.delta(current_instances),
            cool_down: rule.cool_down(),
            metric_type: rule.metric_type.clone(),
            value: sample.value,
        };

        if best.as_ref().is_none_or(|b| candidate.beats(b)) {
            best = Some(candidate);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetscale_state::{Adjustment, Operator};

    fn rule(metric: &str, operator: Operator, threshold: f64, adjustment: Adjustment) -> ScalingRule {
        ScalingRule {
            metric_type: metric.to_string(),
            operator,
            threshold,
            adjustment,
            cool_down_secs: 300,
        }
    }

    fn sample(metric: &str, value: f64) -> MetricSample {
        MetricSample {
            app_id: "app".to_string(),
            metric_type: metric.to_string(),
            value,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn no_rule_fires_returns_none() {
        let rules = vec![rule("cpu", Operator::Gt, 80.0, Adjustment::absolute(2))];
        assert_eq!(evaluate(&rules, &sample("cpu", 50.0), 2), None);
    }

    #[test]
    fn other_metrics_are_ignored() {
        let rules = vec![rule("memoryutil", Operator::Gt, 10.0, Adjustment::absolute(2))];
        assert_eq!(evaluate(&rules, &sample("cpu", 99.0), 2), None);
    }

    #[test]
    fn firing_rule_proposes_its_adjustment() {
        let rules = vec![rule("cpu", Operator::Gt, 80.0, Adjustment::absolute(2))];
        let proposal = evaluate(&rules, &sample("cpu", 85.0), 2).unwrap();
        assert_eq!(proposal.direction, Direction::Up);
        assert_eq!(proposal.delta, 2);
        assert_eq!(proposal.cool_down, Duration::from_secs(300));
        assert_eq!(proposal.rule_index, 0);
    }

    #[test]
    fn larger_magnitude_wins() {
        let rules = vec![
            rule("cpu", Operator::Gt, 80.0, Adjustment::absolute(1)),
            rule("cpu", Operator::Gt, 90.0, Adjustment::absolute(3)),
        ];
        let proposal = evaluate(&rules, &sample("cpu", 95.0), 2).unwrap();
        assert_eq!(proposal.rule_index, 1);
        assert_eq!(proposal.delta, 3);
    }

    #[test]
    fn equal_magnitude_prefers_scale_up() {
        let rules = vec![
            rule("cpu", Operator::Lt, 90.0, Adjustment::absolute(-2)),
            rule("cpu", Operator::Gt, 50.0, Adjustment::absolute(2)),
        ];
        let proposal = evaluate(&rules, &sample("cpu", 70.0), 4).unwrap();
        assert_eq!(proposal.direction, Direction::Up);
        assert_eq!(proposal.rule_index, 1);
    }

    #[test]
    fn equal_rules_keep_the_first() {
        let rules = vec![
            rule("cpu", Operator::Gt, 50.0, Adjustment::absolute(2)),
            rule("cpu", Operator::Gt, 60.0, Adjustment::absolute(2)),
        ];
        let proposal = evaluate(&rules, &sample("cpu", 70.0), 4).unwrap();
        assert_eq!(proposal.rule_index, 0);
    }

    #[test]
    fn percent_adjustments_compare_by_resolved_magnitude() {
        // 50% of 10 instances is 5, which beats an absolute +3.
        let rules = vec![
            rule("cpu", Operator::Gt, 80.0, Adjustment::absolute(3)),
            rule("throughput", Operator::Gt, 1000.0, Adjustment::percent(50)),
        ];
        let samples = vec![sample("cpu", 90.0), sample("throughput", 2000.0)];
        let proposal = evaluate_samples(&rules, &samples, 10).unwrap();
        assert_eq!(proposal.rule_index, 1);
        assert_eq!(proposal.delta, 5);
        assert_eq!(proposal.metric_type, "throughput");
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rules = vec![
            rule("cpu", Operator::Gt, 80.0, Adjustment::absolute(2)),
            rule("cpu", Operator::Lt, 20.0, Adjustment::absolute(-1)),
        ];
        let s = sample("cpu", 85.0);
        assert_eq!(evaluate(&rules, &s, 3), evaluate(&rules, &s, 3));
    }
}
