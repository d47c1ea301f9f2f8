use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{CandleRequest, RawCandleRow, Result, SignalRequest};

/// Source of historical one-minute OHLC rows, consumed once per symbol during
/// warm start.
///
/// Rows come back in whatever order and unit the provider uses; the seeder is
/// responsible for parsing, sorting and unit normalisation.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<RawCandleRow>>;
}

/// Downstream decision service that receives padded close sequences.
///
/// Called off the tick path with a timeout; errors are logged and counted by
/// the caller, never retried.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn dispatch(&self, request: &SignalRequest) -> Result<()>;
}

/// Exchange trading calendar.
pub trait TradingCalendar: Send + Sync {
    /// Whether the market accepts decisions at `at`.
    fn is_open(&self, at: DateTime<Utc>) -> bool;

    /// The exchange-local trading date containing `at`.
    fn session_date(&self, at: DateTime<Utc>) -> NaiveDate;
}
