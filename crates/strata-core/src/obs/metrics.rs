use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

///
/// EventState
/// Process-wide counters; relaxed atomics since they never gate correctness.
///

pub(crate) struct EventState {
    pub(crate) repos_started: AtomicU64,
    pub(crate) repos_stopped: AtomicU64,

    // Planner
    pub(crate) plan_all: AtomicU64,
    pub(crate) plan_update_all: AtomicU64,
    pub(crate) plan_delete_all: AtomicU64,
    pub(crate) prepare_cache: AtomicU64,
    pub(crate) prepare_no_cache: AtomicU64,

    // Cache
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) cache_inserts: AtomicU64,
    pub(crate) cache_evictions: AtomicU64,
}

pub(crate) static STATE: EventState = EventState {
    repos_started: AtomicU64::new(0),
    repos_stopped: AtomicU64::new(0),
    plan_all: AtomicU64::new(0),
    plan_update_all: AtomicU64::new(0),
    plan_delete_all: AtomicU64::new(0),
    prepare_cache: AtomicU64::new(0),
    prepare_no_cache: AtomicU64::new(0),
    cache_hits: AtomicU64::new(0),
    cache_misses: AtomicU64::new(0),
    cache_inserts: AtomicU64::new(0),
    cache_evictions: AtomicU64::new(0),
};

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

///
/// EventReport
/// Point-in-time snapshot of the process counters.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventReport {
    pub repos_started: u64,
    pub repos_stopped: u64,
    pub plan_all: u64,
    pub plan_update_all: u64,
    pub plan_delete_all: u64,
    pub prepare_cache: u64,
    pub prepare_no_cache: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_inserts: u64,
    pub cache_evictions: u64,
}

impl EventState {
    pub(crate) fn report(&self) -> EventReport {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        EventReport {
            repos_started: load(&self.repos_started),
            repos_stopped: load(&self.repos_stopped),
            plan_all: load(&self.plan_all),
            plan_update_all: load(&self.plan_update_all),
            plan_delete_all: load(&self.plan_delete_all),
            prepare_cache: load(&self.prepare_cache),
            prepare_no_cache: load(&self.prepare_no_cache),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_inserts: load(&self.cache_inserts),
            cache_evictions: load(&self.cache_evictions),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.repos_started,
            &self.repos_stopped,
            &self.plan_all,
            &self.plan_update_all,
            &self.plan_delete_all,
            &self.prepare_cache,
            &self.prepare_no_cache,
            &self.cache_hits,
            &self.cache_misses,
            &self.cache_inserts,
            &self.cache_evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
