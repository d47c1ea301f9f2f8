use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info};

use common::{ms_to_datetime, Candle, CandleClosed, Tick};

use crate::aggregator::CandleAggregator;
use crate::history::HistoryStore;
use crate::stats::PipelineStats;
use crate::trigger::{DecisionTrigger, TriggerOutcome};

/// What the rest of the process can see of one symbol's history.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SymbolSnapshot {
    pub history_len: usize,
    /// Externally-visible closes, oldest first.
    pub closes: Vec<f64>,
    pub last_candle: Option<Candle>,
}

impl SymbolSnapshot {
    pub fn last_close(&self) -> Option<f64> {
        self.closes.last().copied()
    }
}

pub type SnapshotBoard = Arc<RwLock<HashMap<String, SymbolSnapshot>>>;

/// Single writer for one symbol: owns its aggregator and history, closes
/// candles and hands each close to the decision trigger.
pub struct SymbolWorker {
    symbol: String,
    aggregator: CandleAggregator,
    trigger: Arc<DecisionTrigger>,
    stats: Arc<PipelineStats>,
    snapshots: SnapshotBoard,
    candle_tx: broadcast::Sender<CandleClosed>,
}

impl SymbolWorker {
    pub fn new(
        symbol: impl Into<String>,
        history: HistoryStore,
        trigger: Arc<DecisionTrigger>,
        stats: Arc<PipelineStats>,
        snapshots: SnapshotBoard,
        candle_tx: broadcast::Sender<CandleClosed>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            aggregator: CandleAggregator::new(history),
            trigger,
            stats,
            snapshots,
            candle_tx,
        }
    }

    /// Process ticks until the sender side is dropped.
    pub async fn run(mut self, mut tick_rx: mpsc::Receiver<Tick>) {
        self.publish_snapshot().await;
        while let Some(tick) = tick_rx.recv().await {
            self.handle_tick(&tick).await;
        }
        debug!(symbol = %self.symbol, "Tick channel closed, worker exiting");
    }

    /// Feed one tick through the aggregator. Returns the trigger outcome when
    /// the tick closed a candle.
    pub async fn handle_tick(&mut self, tick: &Tick) -> Option<TriggerOutcome> {
        self.stats.record_tick();
        let closed = self
            .aggregator
            .add_tick(&self.symbol, tick.price, tick.timestamp_ms)?;

        self.stats.record_candle_closed();
        let closes = self.aggregator.history().get_closes(&self.symbol);
        let at = ms_to_datetime(tick.timestamp_ms);
        info!(
            symbol = %self.symbol,
            start = %ms_to_datetime(closed.start_ts),
            close = closed.close,
            snapshot = closed.boundary_snapshot,
            history = closes.len(),
            "Candle closed"
        );

        self.publish_snapshot().await;
        // No subscribers is fine
        let _ = self.candle_tx.send(CandleClosed {
            symbol: self.symbol.clone(),
            candle: closed,
            closed_at: at,
        });

        Some(self.trigger.on_candle_closed(&self.symbol, &closed, &closes, at))
    }

    async fn publish_snapshot(&self) {
        let history = self.aggregator.history();
        let snapshot = SymbolSnapshot {
            history_len: history.count(&self.symbol),
            closes: history.get_closes(&self.symbol),
            last_candle: history.get(&self.symbol).and_then(|h| h.last().copied()),
        };
        self.snapshots
            .write()
            .await
            .insert(self.symbol.clone(), snapshot);
    }
}
