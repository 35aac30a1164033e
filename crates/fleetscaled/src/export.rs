//! Decision observer that also rewrites a Prometheus textfile each round.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use fleetscale_engine::{DecisionObserver, EngineError, RoundReport, ScalingDecision};
use fleetscale_metrics::{DecisionMetrics, render_prometheus};

pub struct TextfileExporter {
    metrics: Arc<DecisionMetrics>,
    path: PathBuf,
}

impl TextfileExporter {
    pub fn new(metrics: Arc<DecisionMetrics>, path: PathBuf) -> Self {
        Self { metrics, path }
    }

    /// Write to a sibling temp file and rename, so scrapers never see a
    /// partial file.
    pub fn write(&self) -> std::io::Result<()> {
        let body = render_prometheus(&self.metrics.snapshot());
        let tmp = self.path.with_extension("prom.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl DecisionObserver for TextfileExporter {
    fn on_decision(&self, decision: &ScalingDecision) {
        self.metrics.on_decision(decision);
    }

    fn on_failure(&self, app_id: &str, error: &EngineError) {
        self.metrics.on_failure(app_id, error);
    }

    fn on_round(&self, report: &RoundReport) {
        self.metrics.on_round(report);
        if let Err(e) = self.write() {
            warn!(path = %self.path.display(), error = %e, "failed to write metrics file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_rewrites_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetscale.prom");
        let exporter = TextfileExporter::new(Arc::new(DecisionMetrics::new()), path.clone());

        exporter.on_round(&RoundReport::default());
        exporter.on_round(&RoundReport::default());

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("fleetscale_rounds_total 2"));
        assert!(!dir.path().join("fleetscale.prom.tmp").exists());
    }
}
