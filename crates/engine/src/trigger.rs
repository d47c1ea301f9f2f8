use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{Candle, DecisionSink, ExecutionMode, SignalRequest, TradingCalendar};

use crate::stats::PipelineStats;

/// A close sequence of exactly `window_size + 1` values.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedCloses {
    pub closes: Vec<f64>,
    /// How many leading values are repeats of the earliest real close.
    pub padded: usize,
}

/// Take the last `window_size + 1` closes, or left-pad a shorter non-empty
/// history by repeating its earliest close. `None` when there is no history.
pub fn padded_closes(closes: &[f64], window_size: usize) -> Option<PaddedCloses> {
    let needed = window_size + 1;
    let earliest = *closes.first()?;

    if closes.len() >= needed {
        return Some(PaddedCloses {
            closes: closes[closes.len() - needed..].to_vec(),
            padded: 0,
        });
    }

    let padded = needed - closes.len();
    let mut out = vec![earliest; padded];
    out.extend_from_slice(closes);
    Some(PaddedCloses { closes: out, padded })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoHistory,
    MarketClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A signal request was handed to a dispatch task.
    Dispatched { padded: usize },
    Skipped(SkipReason),
}

/// Runs on every closed candle: pads the history, consults the trading
/// calendar and hands a [`SignalRequest`] to the decision sink.
///
/// Dispatch happens on a spawned task bounded by `dispatch_timeout`, so the
/// caller never waits on the sink. Failures are logged and counted, never
/// retried.
pub struct DecisionTrigger {
    window_size: usize,
    mode: ExecutionMode,
    dispatch_timeout: Duration,
    calendar: Arc<dyn TradingCalendar>,
    sink: Arc<dyn DecisionSink>,
    stats: Arc<PipelineStats>,
}

impl DecisionTrigger {
    pub fn new(
        window_size: usize,
        mode: ExecutionMode,
        dispatch_timeout: Duration,
        calendar: Arc<dyn TradingCalendar>,
        sink: Arc<dyn DecisionSink>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            window_size,
            mode,
            dispatch_timeout,
            calendar,
            sink,
            stats,
        }
    }

    /// `closes` is the symbol's full history including `candle`; `at` is the
    /// time of the tick that closed it. Must be called inside a tokio runtime.
    pub fn on_candle_closed(
        &self,
        symbol: &str,
        candle: &Candle,
        closes: &[f64],
        at: DateTime<Utc>,
    ) -> TriggerOutcome {
        let Some(padded) = padded_closes(closes, self.window_size) else {
            debug!(symbol, "Decision skipped, no completed candles yet");
            self.stats.record_skip_no_history();
            return TriggerOutcome::Skipped(SkipReason::NoHistory);
        };

        if !self.calendar.is_open(at) {
            debug!(symbol, at = %at, "Decision skipped, market closed");
            self.stats.record_skip_market_closed();
            return TriggerOutcome::Skipped(SkipReason::MarketClosed);
        }

        info!(
            symbol,
            closes = padded.closes.len(),
            padded = padded.padded,
            real = closes.len().min(self.window_size + 1),
            "Decision triggered"
        );

        let request = SignalRequest {
            closes: padded.closes,
            symbol: symbol.to_string(),
            price: candle.observed_close(),
            dry_run: self.mode.is_dry_run(),
        };
        self.spawn_dispatch(request);
        TriggerOutcome::Dispatched {
            padded: padded.padded,
        }
    }

    fn spawn_dispatch(&self, request: SignalRequest) {
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        let timeout = self.dispatch_timeout;
        stats.record_dispatch();

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, sink.dispatch(&request)).await {
                Ok(Ok(())) => debug!(symbol = %request.symbol, "Signal request delivered"),
                Ok(Err(e)) => {
                    stats.record_dispatch_failure();
                    warn!(symbol = %request.symbol, error = %e, "Signal dispatch failed, dropped");
                }
                Err(_) => {
                    stats.record_dispatch_failure();
                    warn!(symbol = %request.symbol, timeout = ?timeout, "Signal dispatch timed out, dropped");
                }
            }
        });
    }
}
