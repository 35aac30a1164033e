//! fleetscale-metrics: observability for scaling decisions.
//!
//! Counts every decision and failure the engine reports, per application,
//! and renders them in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! DecisionMetrics (DecisionObserver)
//!   ├── on_decision() ← one call per app per cycle
//!   ├── on_failure()  ← one call per failed cycle
//!   └── snapshot()    → DecisionSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for scraping or a textfile collector
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{AppSnapshot, DecisionMetrics, DecisionSnapshot};
pub use prometheus::render_prometheus;
