//! Observability: runtime counters and the sink abstraction.
//!
//! Planner, cache and registry code never touch counters directly; they emit
//! `MetricsEvent`s through `sink::record`.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::EventReport;
pub use sink::{MetricsEvent, MetricsSink, metrics_report, metrics_reset_all, with_metrics_sink};
