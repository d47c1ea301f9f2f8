use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, HistoricalSource, SymbolFileConfig, TradingCalendar};
use engine::{
    Engine, EngineSettings, HttpDecisionSink, HttpHistoricalSource, MarketCalendar, TickFanout,
    TickStream, FANOUT_QUEUE,
};
use features::{FeatureObserver, RealTimeFeatureBuilder};

const TICK_QUEUE: usize = 4096;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().unwrap_or_else(|e| panic!("Invalid configuration: {e}"));
    info!(mode = %cfg.execution_mode, window = cfg.window_size, "tickbridge starting");

    let symbols = SymbolFileConfig::load(&cfg.symbols_config_path)
        .unwrap_or_else(|e| panic!("Failed to load instruments: {e}"))
        .symbols;
    info!(
        symbols = ?symbols.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        "Instruments loaded"
    );

    // ── Calendar ──────────────────────────────────────────────────────────────
    let market_calendar = MarketCalendar::from_config(&cfg)
        .unwrap_or_else(|e| panic!("Failed to build trading calendar: {e}"));
    let offset = market_calendar.offset();
    let calendar: Arc<dyn TradingCalendar> = Arc::new(market_calendar);

    // ── Collaborators ─────────────────────────────────────────────────────────
    let sink = HttpDecisionSink::new(&cfg.signal_url, cfg.dispatch_timeout)
        .unwrap_or_else(|e| panic!("Failed to build decision sink client: {e}"));
    info!(url = %cfg.signal_url, "Decision sink configured");

    // ── Engine ────────────────────────────────────────────────────────────────
    let (mut engine, engine_handle) = Engine::new(
        EngineSettings::from_config(&cfg),
        symbols.clone(),
        Arc::new(sink),
        calendar.clone(),
    );

    match &cfg.history_url {
        Some(url) => {
            let source: Arc<dyn HistoricalSource> = Arc::new(
                HttpHistoricalSource::new(url, offset)
                    .unwrap_or_else(|e| panic!("Failed to build historical client: {e}")),
            );
            engine = engine.with_history_source(source);
        }
        None => warn!("HISTORY_URL not set, warm start disabled"),
    }

    if let Some(url) = &cfg.tick_fanout_url {
        let fanout = TickFanout::new(url, cfg.fanout_timeout, engine_handle.stats())
            .unwrap_or_else(|e| panic!("Failed to build tick fan-out client: {e}"));
        let (fanout_tx, fanout_rx) = mpsc::channel(FANOUT_QUEUE);
        engine = engine.with_tick_fanout(fanout_tx);
        tokio::spawn(fanout.run(fanout_rx));
    }

    // ── Warm start (must finish before live ticks are processed) ─────────────
    let results = engine.warm_start().await;
    for r in results.iter().filter(|r| !r.is_success()) {
        warn!(symbol = %r.symbol, outcome = ?r.outcome, "Symbol will start with padded history");
    }

    // ── Streaming observer ────────────────────────────────────────────────────
    let observer = FeatureObserver::new(
        RealTimeFeatureBuilder::new(cfg.window_size, cfg.observation_min_history),
        cfg.observation_position,
        calendar.clone(),
    );
    let observations = observer.board();
    let candle_rx = engine_handle.subscribe_candles();

    // ── HTTP API ──────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        engine: engine_handle.clone(),
        observations,
        mode: cfg.execution_mode,
        window_size: cfg.window_size,
        api_token: cfg.api_token.clone(),
    };
    let port = cfg.api_port;

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let (tick_tx, tick_rx) = mpsc::channel(TICK_QUEUE);
    tokio::spawn(observer.run(candle_rx));
    tokio::spawn(engine.run(tick_rx));
    tokio::spawn(TickStream::new(&cfg.tick_stream_url, symbols, tick_tx).run());
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "HTTP API stopped");
        }
    });

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    let stats = engine_handle.stats_snapshot();
    info!(
        ticks = stats.ticks,
        candles = stats.candles_closed,
        dispatches = stats.dispatches,
        dispatch_failures = stats.dispatch_failures,
        "Shutdown signal received. Exiting."
    );
}
