use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Pipeline counters. Every non-fatal side-effect failure bumps one of these.
#[derive(Debug, Default)]
pub struct PipelineStats {
    ticks: AtomicU64,
    candles_closed: AtomicU64,
    dispatches: AtomicU64,
    dispatch_failures: AtomicU64,
    skipped_no_history: AtomicU64,
    skipped_market_closed: AtomicU64,
    fanout_failures: AtomicU64,
    fanout_dropped: AtomicU64,
    worker_dropped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub candles_closed: u64,
    pub dispatches: u64,
    pub dispatch_failures: u64,
    pub skipped_no_history: u64,
    pub skipped_market_closed: u64,
    pub fanout_failures: u64,
    pub fanout_dropped: u64,
    pub worker_dropped: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    counter!(record_tick, ticks);
    counter!(record_candle_closed, candles_closed);
    counter!(record_dispatch, dispatches);
    counter!(record_dispatch_failure, dispatch_failures);
    counter!(record_skip_no_history, skipped_no_history);
    counter!(record_skip_market_closed, skipped_market_closed);
    counter!(record_fanout_failure, fanout_failures);
    counter!(record_fanout_dropped, fanout_dropped);
    counter!(record_worker_dropped, worker_dropped);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            candles_closed: self.candles_closed.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            skipped_no_history: self.skipped_no_history.load(Ordering::Relaxed),
            skipped_market_closed: self.skipped_market_closed.load(Ordering::Relaxed),
            fanout_failures: self.fanout_failures.load(Ordering::Relaxed),
            fanout_dropped: self.fanout_dropped.load(Ordering::Relaxed),
            worker_dropped: self.worker_dropped.load(Ordering::Relaxed),
        }
    }
}
