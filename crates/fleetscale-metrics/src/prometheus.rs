//! Prometheus text exposition format.
//!
//! Renders a decision snapshot for scraping by a Prometheus server or for
//! the node-exporter textfile collector.

use std::fmt::Write;

use crate::collector::{DecisionSnapshot, REASONS};

/// Render a decision snapshot into Prometheus text format.
///
/// Produces COUNTER and GAUGE metrics with `app` labels.
pub fn render_prometheus(snapshot: &DecisionSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP fleetscale_rounds_total Evaluation rounds completed.\n");
    out.push_str("# TYPE fleetscale_rounds_total counter\n");
    let _ = writeln!(out, "fleetscale_rounds_total {}", snapshot.rounds);

    out.push_str("# HELP fleetscale_decisions_total Scaling decisions by reason.\n");
    out.push_str("# TYPE fleetscale_decisions_total counter\n");
    for app in &snapshot.apps {
        for reason in REASONS {
            let count = app.decisions.get(reason).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "fleetscale_decisions_total{{app=\"{}\",reason=\"{reason}\"}} {count}",
                escape(&app.app_id)
            );
        }
    }

    out.push_str("# HELP fleetscale_failures_total Evaluation cycles that ended in an error, by kind.\n");
    out.push_str("# TYPE fleetscale_failures_total counter\n");
    for app in &snapshot.apps {
        for (kind, count) in &app.failures {
            let _ = writeln!(
                out,
                "fleetscale_failures_total{{app=\"{}\",kind=\"{kind}\"}} {count}",
                escape(&app.app_id)
            );
        }
    }

    gauge(&mut out, snapshot, "fleetscale_current_instances", "Instance count seen in the last cycle.", |a| {
        a.current_instances
    });
    gauge(&mut out, snapshot, "fleetscale_target_instances", "Instance count after the last cycle.", |a| {
        a.target_instances
    });
    gauge(&mut out, snapshot, "fleetscale_bounds_min", "Effective minimum in the last cycle.", |a| a.bounds_min);
    gauge(&mut out, snapshot, "fleetscale_bounds_max", "Effective maximum in the last cycle.", |a| a.bounds_max);

    out
}

fn gauge(
    out: &mut String,
    snapshot: &DecisionSnapshot,
    name: &str,
    help: &str,
    value: impl Fn(&crate::collector::AppSnapshot) -> u64,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for app in &snapshot.apps {
        let _ = writeln!(out, "{name}{{app=\"{}\"}} {}", escape(&app.app_id), value(app));
    }
}

/// Escape a label value per the exposition format.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
