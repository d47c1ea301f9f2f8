use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Width of one candle bucket in milliseconds.
pub const CANDLE_MS: i64 = 60_000;

/// Floor an epoch-millisecond timestamp to the start of its minute.
pub fn floor_to_minute(timestamp_ms: i64) -> i64 {
    timestamp_ms.div_euclid(CANDLE_MS) * CANDLE_MS
}

/// Convert epoch milliseconds to a UTC datetime, falling back to the epoch for
/// values chrono cannot represent.
pub fn ms_to_datetime(timestamp_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A single live price update for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub timestamp_ms: i64,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, timestamp_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp_ms,
        }
    }
}

/// One minute of trading for one symbol.
///
/// `start_ts` is always minute-aligned. `boundary_snapshot` is the price of the
/// tick that closed this candle (the first tick of the next minute); it stays
/// `0.0` while the candle is open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub boundary_snapshot: f64,
}

impl Candle {
    /// A fresh open candle seeded by a single tick.
    pub fn from_tick(start_ts: i64, price: f64) -> Self {
        Self {
            start_ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
            boundary_snapshot: 0.0,
        }
    }

    /// The close as seen by observation building: the boundary snapshot when
    /// set, the in-bucket close otherwise.
    pub fn observed_close(&self) -> f64 {
        if self.boundary_snapshot > 0.0 {
            self.boundary_snapshot
        } else {
            self.close
        }
    }
}

/// Emitted on the engine's broadcast channel whenever a candle closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleClosed {
    pub symbol: String,
    pub candle: Candle,
    /// Timestamp of the tick that triggered the rollover.
    pub closed_at: DateTime<Utc>,
}

/// Body sent to the decision sink on every gated candle close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub closes: Vec<f64>,
    pub symbol: String,
    pub price: f64,
    pub dry_run: bool,
}

/// Request sent to the historical-data collaborator during warm start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRequest {
    pub symbol: String,
    pub exchange: String,
    pub token: String,
    /// Always `"1m"` for this pipeline.
    pub interval: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One raw historical row: `[timestamp, open, high, low, close, volume]`.
/// Kept as untyped JSON so a malformed row can be skipped on its own.
pub type RawCandleRow = Vec<serde_json::Value>;

/// How a warm start for one symbol ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum WarmStartOutcome {
    /// History was cleared and reseeded.
    Seeded,
    /// The source answered but no row survived parsing.
    Empty,
    /// The source was unreachable or reported failure.
    FetchFailed(String),
    /// No historical source is configured.
    Disabled,
}

/// Result of seeding one symbol's history. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmStartResult {
    pub symbol: String,
    pub outcome: WarmStartOutcome,
    /// Candles appended to history.
    pub seeded: usize,
    /// Rows skipped because they failed to parse.
    pub rejected_rows: usize,
    pub first_ts: Option<i64>,
    pub last_ts: Option<i64>,
}

impl WarmStartResult {
    pub fn failed(symbol: impl Into<String>, outcome: WarmStartOutcome) -> Self {
        Self {
            symbol: symbol.into(),
            outcome,
            seeded: 0,
            rejected_rows: 0,
            first_ts: None,
            last_ts: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == WarmStartOutcome::Seeded && self.seeded > 0
    }

    /// True when the decision trigger will have to pad this symbol's closes.
    pub fn needs_padding(&self, window_size: usize) -> bool {
        self.seeded < window_size + 1
    }
}

/// Whether signal requests are marked as dry runs for the downstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::DryRun => write!(f, "dry_run"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Current state of the aggregation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Stopped,
    WarmingUp,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::WarmingUp => write!(f, "warming_up"),
            EngineState::Running => write!(f, "running"),
        }
    }
}
