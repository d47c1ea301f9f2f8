use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use common::{
    CandleClosed, Config, DecisionSink, EngineState, ExecutionMode, HistoricalSource,
    SymbolConfig, Tick, TradingCalendar, WarmStartOutcome, WarmStartResult,
};

use crate::history::{HistoryStore, SymbolHistory};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::trigger::DecisionTrigger;
use crate::warm_start::WarmStartSeeder;
use crate::worker::{SnapshotBoard, SymbolSnapshot, SymbolWorker};

const WORKER_QUEUE: usize = 1024;
const CANDLE_BROADCAST: usize = 1024;

/// Tunables the engine needs from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub window_size: usize,
    pub history_margin: usize,
    pub warm_start_margin: usize,
    pub mode: ExecutionMode,
    pub dispatch_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            window_size: cfg.window_size,
            history_margin: cfg.history_margin,
            warm_start_margin: cfg.warm_start_margin,
            mode: cfg.execution_mode,
            dispatch_timeout: cfg.dispatch_timeout,
        }
    }

    pub fn history_capacity(&self) -> usize {
        HistoryStore::capacity_for(self.window_size, self.history_margin)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            history_margin: 5,
            warm_start_margin: 10,
            mode: ExecutionMode::DryRun,
            dispatch_timeout: Duration::from_secs(3),
        }
    }
}

/// Cloneable handle passed to other crates (API, observer wiring).
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<RwLock<EngineState>>,
    snapshots: SnapshotBoard,
    stats: Arc<PipelineStats>,
    candle_tx: broadcast::Sender<CandleClosed>,
}

impl EngineHandle {
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.snapshots.read().await.get(symbol).cloned()
    }

    pub async fn snapshots(&self) -> HashMap<String, SymbolSnapshot> {
        self.snapshots.read().await.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribe to the closed-candle broadcast.
    pub fn subscribe_candles(&self) -> broadcast::Receiver<CandleClosed> {
        self.candle_tx.subscribe()
    }
}

/// The main engine: warm start, then one worker per symbol fed by a router.
pub struct Engine {
    settings: EngineSettings,
    symbols: Vec<SymbolConfig>,
    trigger: Arc<DecisionTrigger>,
    source: Option<Arc<dyn HistoricalSource>>,
    tick_fanout: Option<mpsc::Sender<Tick>>,
    seeded: HistoryStore,
    state: Arc<RwLock<EngineState>>,
    snapshots: SnapshotBoard,
    stats: Arc<PipelineStats>,
    candle_tx: broadcast::Sender<CandleClosed>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        symbols: Vec<SymbolConfig>,
        sink: Arc<dyn DecisionSink>,
        calendar: Arc<dyn TradingCalendar>,
    ) -> (Self, EngineHandle) {
        let (candle_tx, _) = broadcast::channel(CANDLE_BROADCAST);
        let state = Arc::new(RwLock::new(EngineState::Stopped));
        let snapshots = SnapshotBoard::default();
        let stats = Arc::new(PipelineStats::default());

        let trigger = Arc::new(DecisionTrigger::new(
            settings.window_size,
            settings.mode,
            settings.dispatch_timeout,
            calendar,
            sink,
            stats.clone(),
        ));

        let handle = EngineHandle {
            state: state.clone(),
            snapshots: snapshots.clone(),
            stats: stats.clone(),
            candle_tx: candle_tx.clone(),
        };

        let engine = Engine {
            seeded: HistoryStore::new(settings.history_capacity()),
            settings,
            symbols,
            trigger,
            source: None,
            tick_fanout: None,
            state,
            snapshots,
            stats,
            candle_tx,
        };

        (engine, handle)
    }

    pub fn with_history_source(mut self, source: Arc<dyn HistoricalSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Every routed tick is also offered to `tx` without waiting.
    pub fn with_tick_fanout(mut self, tx: mpsc::Sender<Tick>) -> Self {
        self.tick_fanout = Some(tx);
        self
    }

    /// Seed history for every configured symbol, one at a time.
    ///
    /// Must complete before [`Engine::run`]; nothing here is fatal.
    pub async fn warm_start(&mut self) -> Vec<WarmStartResult> {
        *self.state.write().await = EngineState::WarmingUp;
        let window = self.settings.window_size;

        let Some(source) = self.source.clone() else {
            warn!("No historical source configured, every symbol starts with padding");
            return self
                .symbols
                .iter()
                .map(|s| WarmStartResult::failed(&s.name, WarmStartOutcome::Disabled))
                .collect();
        };

        let seeder = WarmStartSeeder::new(source, self.settings.warm_start_margin);
        let mut results = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            results.push(seeder.seed(&mut self.seeded, symbol, window).await);
        }

        let seeded = results.iter().filter(|r| r.is_success()).count();
        let padded = results.iter().filter(|r| r.needs_padding(window)).count();
        let failed = results
            .iter()
            .filter(|r| matches!(r.outcome, WarmStartOutcome::FetchFailed(_)))
            .count();
        info!(
            symbols = results.len(),
            seeded, padded, failed, "Warm start complete"
        );
        results
    }

    /// Route ticks to per-symbol workers until `tick_rx` closes.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self, mut tick_rx: mpsc::Receiver<Tick>) {
        let mut workers: HashMap<String, mpsc::Sender<Tick>> = HashMap::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let configured: Vec<String> = self.symbols.iter().map(|s| s.name.clone()).collect();
        for name in &configured {
            self.worker_for(name, &mut workers, &mut tasks);
        }

        *self.state.write().await = EngineState::Running;
        info!(symbols = ?configured, "Engine running");

        while let Some(tick) = tick_rx.recv().await {
            if let Some(fanout) = &self.tick_fanout {
                if fanout.try_send(tick.clone()).is_err() {
                    self.stats.record_fanout_dropped();
                    debug!(symbol = %tick.symbol, "Fan-out queue full, tick dropped for telemetry");
                }
            }

            let tx = self.worker_for(&tick.symbol, &mut workers, &mut tasks);
            route_to_worker(&tx, tick, &self.stats);
        }

        info!("Tick channel closed, draining workers");
        drop(workers);
        for task in tasks {
            let _ = task.await;
        }
        *self.state.write().await = EngineState::Stopped;
        info!("Engine stopped");
    }

    /// Explicit get-or-create: the first tick of an unseen symbol spawns its
    /// worker, moving any seeded history into it.
    fn worker_for(
        &mut self,
        symbol: &str,
        workers: &mut HashMap<String, mpsc::Sender<Tick>>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> mpsc::Sender<Tick> {
        if let Some(tx) = workers.get(symbol) {
            return tx.clone();
        }

        let capacity = self.settings.history_capacity();
        let mut history = HistoryStore::new(capacity);
        let seeded = self
            .seeded
            .take(symbol)
            .unwrap_or_else(|| SymbolHistory::new(capacity));
        debug!(symbol, seeded = seeded.len(), "Spawning symbol worker");
        history.insert(symbol, seeded);

        let worker = SymbolWorker::new(
            symbol,
            history,
            self.trigger.clone(),
            self.stats.clone(),
            self.snapshots.clone(),
            self.candle_tx.clone(),
        );
        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        tasks.push(tokio::spawn(worker.run(rx)));
        workers.insert(symbol.to_string(), tx.clone());
        tx
    }
}

/// Offer `tick` to its symbol's worker without waiting. A full queue drops the
/// tick and counts it.
fn route_to_worker(tx: &mpsc::Sender<Tick>, tick: Tick, stats: &PipelineStats) {
    match tx.try_send(tick) {
        Ok(()) => {}
        Err(TrySendError::Full(tick)) => {
            stats.record_worker_dropped();
            warn!(symbol = %tick.symbol, ts = tick.timestamp_ms, "Worker queue full, tick dropped");
        }
        Err(TrySendError::Closed(tick)) => {
            warn!(symbol = %tick.symbol, "Worker channel closed unexpectedly");
        }
    }
}
