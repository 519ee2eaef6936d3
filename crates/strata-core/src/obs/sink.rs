//! Metrics sink boundary.
//!
//! Core logic MUST NOT depend on `obs::metrics` directly. All
//! instrumentation flows through `MetricsEvent` and `MetricsSink`.

use crate::{
    db::query::Operation,
    obs::metrics::{self, EventReport, STATE},
};
use std::{cell::RefCell, sync::Arc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Arc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    RepoStarted,
    RepoStopped,
    Plan { operation: Operation },
    Prepare { operation: Operation, cacheable: bool },
    CacheHit,
    CacheMiss,
    CacheInsert,
    CacheEvict,
}

///
/// MetricsSink
///

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricsEvent);
}

///
/// GlobalMetricsSink
/// Default sink writing into the process counters.
///

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        let counter = match event {
            MetricsEvent::RepoStarted => &STATE.repos_started,
            MetricsEvent::RepoStopped => &STATE.repos_stopped,
            MetricsEvent::Plan { operation } => match operation {
                Operation::All => &STATE.plan_all,
                Operation::UpdateAll => &STATE.plan_update_all,
                Operation::DeleteAll => &STATE.plan_delete_all,
            },
            MetricsEvent::Prepare { cacheable: true, .. } => &STATE.prepare_cache,
            MetricsEvent::Prepare {
                cacheable: false, ..
            } => &STATE.prepare_no_cache,
            MetricsEvent::CacheHit => &STATE.cache_hits,
            MetricsEvent::CacheMiss => &STATE.cache_misses,
            MetricsEvent::CacheInsert => &STATE.cache_inserts,
            MetricsEvent::CacheEvict => &STATE.cache_evictions,
        };

        metrics::bump(counter);
    }
}

/// Route one event to the scoped override, or the global sink.
pub(crate) fn record(event: MetricsEvent) {
    tracing::trace!(?event, "metrics event");

    let scoped = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match scoped {
        Some(sink) => sink.record(event),
        None => GlobalMetricsSink.record(event),
    }
}

/// Run `f` with `sink` receiving this thread's events instead of the global
/// counters. Overrides nest; the previous sink is restored afterwards.
pub fn with_metrics_sink<R>(sink: Arc<dyn MetricsSink>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Arc<dyn MetricsSink>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            SINK_OVERRIDE.with(|cell| *cell.borrow_mut() = prev);
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _restore = Restore(prev);

    f()
}

#[must_use]
pub fn metrics_report() -> EventReport {
    STATE.report()
}

pub fn metrics_reset_all() {
    STATE.reset();
}
