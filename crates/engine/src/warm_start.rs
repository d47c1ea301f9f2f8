use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use common::{
    floor_to_minute, ms_to_datetime, Candle, CandleRequest, Error, HistoricalSource,
    RawCandleRow, Result, SymbolConfig, WarmStartOutcome, WarmStartResult,
};

use crate::history::HistoryStore;

/// Closes above this are assumed to be quoted in minor units (paise/cents).
const MINOR_UNIT_THRESHOLD: f64 = 100_000.0;

/// Timestamp formats carrying an explicit offset, tried after RFC 3339.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%:z"];

/// Offset-less formats, interpreted as UTC. Order matters: first match wins.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// One-time bulk load of historical candles into a [`HistoryStore`] before
/// live ticks are processed.
pub struct WarmStartSeeder {
    source: Arc<dyn HistoricalSource>,
    margin: usize,
}

impl WarmStartSeeder {
    /// `margin` extra minutes are requested on top of the window.
    pub fn new(source: Arc<dyn HistoricalSource>, margin: usize) -> Self {
        Self { source, margin }
    }

    pub async fn seed(
        &self,
        store: &mut HistoryStore,
        symbol: &SymbolConfig,
        window_size: usize,
    ) -> WarmStartResult {
        self.seed_at(store, symbol, window_size, Utc::now()).await
    }

    /// Seed `symbol` as of `now`.
    ///
    /// On fetch failure or when no row parses, the store is left untouched so
    /// the decision trigger falls back to padding.
    pub async fn seed_at(
        &self,
        store: &mut HistoryStore,
        symbol: &SymbolConfig,
        window_size: usize,
        now: DateTime<Utc>,
    ) -> WarmStartResult {
        let minutes = i64::try_from(window_size + self.margin).unwrap_or(i64::MAX / 60_000);
        let request = CandleRequest {
            symbol: symbol.name.clone(),
            exchange: symbol.exchange.clone(),
            token: symbol.token.clone(),
            interval: "1m".to_string(),
            from: now - Duration::minutes(minutes),
            to: now,
        };

        info!(symbol = %symbol.name, from = %request.from, to = %request.to, "Fetching historical candles");
        let rows = match self.source.fetch_candles(&request).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol = %symbol.name, error = %e, "Historical fetch failed, padding fallback will be used");
                return WarmStartResult::failed(&symbol.name, WarmStartOutcome::FetchFailed(e.to_string()));
            }
        };

        if rows.is_empty() {
            warn!(
                symbol = %symbol.name,
                token = %symbol.token,
                "No historical rows returned (market closed, wrong token or empty range)"
            );
            return WarmStartResult::failed(&symbol.name, WarmStartOutcome::Empty);
        }

        let mut rejected_rows = 0;
        let mut candles: Vec<Candle> = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_row(row) {
                Ok(candle) => candles.push(candle),
                Err(e) => {
                    debug!(symbol = %symbol.name, row = ?row, error = %e, "Skipping historical row");
                    rejected_rows += 1;
                }
            }
        }

        if candles.is_empty() {
            warn!(symbol = %symbol.name, rejected = rejected_rows, "No valid historical candles parsed");
            let mut result = WarmStartResult::failed(&symbol.name, WarmStartOutcome::Empty);
            result.rejected_rows = rejected_rows;
            return result;
        }

        // source order is not guaranteed
        candles.sort_by_key(|c| c.start_ts);
        let keep = window_size + 1;
        let seed = &candles[candles.len().saturating_sub(keep)..];

        store.clear(&symbol.name);
        for candle in seed {
            store.append(&symbol.name, *candle);
        }

        let result = WarmStartResult {
            symbol: symbol.name.clone(),
            outcome: WarmStartOutcome::Seeded,
            seeded: seed.len(),
            rejected_rows,
            first_ts: seed.first().map(|c| c.start_ts),
            last_ts: seed.last().map(|c| c.start_ts),
        };
        log_seed_summary(&result, seed);
        result
    }
}

fn log_seed_summary(result: &WarmStartResult, seed: &[Candle]) {
    let (lo, hi, sum) = seed.iter().fold((f64::MAX, f64::MIN, 0.0), |(lo, hi, sum), c| {
        (lo.min(c.close), hi.max(c.close), sum + c.close)
    });
    let avg = sum / seed.len() as f64;
    let variation_pct = if lo > 0.0 { (hi - lo) / lo * 100.0 } else { 0.0 };

    info!(
        symbol = %result.symbol,
        candles = result.seeded,
        rejected = result.rejected_rows,
        from = %result.first_ts.map(ms_to_datetime).unwrap_or_default(),
        to = %result.last_ts.map(ms_to_datetime).unwrap_or_default(),
        "History seeded"
    );
    info!(symbol = %result.symbol, min = lo, max = hi, avg, variation_pct, "Seeded close range");
    if variation_pct <= 0.01 {
        warn!(symbol = %result.symbol, "Seeded closes are flat, source data may be stale or mocked");
    }
}

/// Parse `[timestamp, open, high, low, close, volume?]` into a closed candle.
///
/// Prices above the minor-unit threshold are divided by 100. The boundary
/// snapshot equals the row's close since seeded candles have no closing tick.
pub fn parse_row(row: &RawCandleRow) -> Result<Candle> {
    if row.len() < 5 {
        return Err(Error::Parse(format!("expected at least 5 fields, got {}", row.len())));
    }
    let ts_raw = row[0]
        .as_str()
        .ok_or_else(|| Error::Parse(format!("timestamp is not a string: {}", row[0])))?;
    let start_ts = floor_to_minute(parse_timestamp(ts_raw)?);

    let mut open = number(&row[1], "open")?;
    let mut high = number(&row[2], "high")?;
    let mut low = number(&row[3], "low")?;
    let mut close = number(&row[4], "close")?;
    let volume = row.get(5).map(|v| number(v, "volume")).transpose()?.unwrap_or(0.0);

    if close > MINOR_UNIT_THRESHOLD {
        open /= 100.0;
        high /= 100.0;
        low /= 100.0;
        close /= 100.0;
    }

    Ok(Candle {
        start_ts,
        open,
        high,
        low,
        close,
        volume,
        boundary_snapshot: close,
    })
}

/// Parse a provider timestamp to epoch milliseconds, trying ISO-8601 first and
/// then the plain `YYYY-MM-DD HH:MM[:SS]` forms (as UTC).
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.timestamp_millis());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    Err(Error::Parse(format!("unrecognized candle timestamp: '{raw}'")))
}

fn number(value: &Value, field: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::Parse(format!("{field} is not numeric: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedSource {
        rows: Result<Vec<RawCandleRow>>,
        seen: Mutex<Vec<CandleRequest>>,
    }

    impl CannedSource {
        fn ok(rows: Vec<RawCandleRow>) -> Arc<Self> {
            Arc::new(Self { rows: Ok(rows), seen: Mutex::new(Vec::new()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                rows: Err(Error::Fetch("connection refused".into())),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HistoricalSource for CannedSource {
        async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<RawCandleRow>> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.rows {
                Ok(rows) => Ok(rows.clone()),
                Err(e) => Err(Error::Fetch(e.to_string())),
            }
        }
    }

    fn nifty() -> SymbolConfig {
        SymbolConfig {
            name: "NIFTY".into(),
            exchange: "NSE".into(),
            token: "99926000".into(),
        }
    }

    fn row(ts: &str, close: f64) -> RawCandleRow {
        vec![json!(ts), json!(close), json!(close + 1.0), json!(close - 1.0), json!(close), json!(10)]
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap()
    }

    #[test]
    fn timestamp_formats_in_order() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 9, 15, 0).unwrap().timestamp_millis();
        assert_eq!(parse_timestamp("2024-01-02T09:15:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02T14:45:00+05:30").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02T14:45:00+0530").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02T09:15:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02 09:15").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02 09:15:00").unwrap(), expected);
        assert!(matches!(parse_timestamp("02/01/2024 09:15"), Err(Error::Parse(_))));
    }

    #[test]
    fn minor_unit_rows_are_scaled() {
        let c = parse_row(&vec![
            json!("2024-01-02 09:15"),
            json!(2_150_000.0),
            json!(2_160_000.0),
            json!(2_140_000.0),
            json!(2_155_000.0),
        ])
        .unwrap();
        assert_eq!((c.open, c.high, c.low, c.close), (21_500.0, 21_600.0, 21_400.0, 21_550.0));
        assert_eq!(c.boundary_snapshot, 21_550.0);
        assert_eq!(c.volume, 0.0);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let c = parse_row(&vec![
            json!("2024-01-02 09:15:30"),
            json!("100.5"),
            json!("101"),
            json!("99"),
            json!("100"),
            json!("42"),
        ])
        .unwrap();
        assert_eq!(c.start_ts % 60_000, 0);
        assert_eq!(c.open, 100.5);
        assert_eq!(c.volume, 42.0);
    }

    #[test]
    fn malformed_rows_are_parse_errors() {
        assert!(parse_row(&vec![json!("2024-01-02 09:15"), json!(1.0)]).is_err());
        assert!(parse_row(&vec![json!(123), json!(1), json!(1), json!(1), json!(1)]).is_err());
        assert!(parse_row(&vec![json!("2024-01-02 09:15"), json!("x"), json!(1), json!(1), json!(1)]).is_err());
    }

    #[tokio::test]
    async fn seeds_last_window_plus_one_sorted() {
        // 6 rows, shuffled; window 3 keeps the newest 4
        let source = CannedSource::ok(vec![
            row("2024-01-02 09:18", 103.0),
            row("2024-01-02 09:15", 100.0),
            row("2024-01-02 09:20", 105.0),
            row("2024-01-02 09:16", 101.0),
            row("2024-01-02 09:19", 104.0),
            row("2024-01-02 09:17", 102.0),
        ]);
        let seeder = WarmStartSeeder::new(source.clone(), 10);
        let mut store = HistoryStore::new(HistoryStore::capacity_for(3, 5));

        let result = seeder.seed_at(&mut store, &nifty(), 3, now()).await;

        assert!(result.is_success());
        assert_eq!(result.seeded, 4);
        assert_eq!(store.get_closes("NIFTY"), vec![102.0, 103.0, 104.0, 105.0]);
        assert_eq!(result.first_ts, Some(parse_timestamp("2024-01-02 09:17").unwrap()));
        assert_eq!(result.last_ts, Some(parse_timestamp("2024-01-02 09:20").unwrap()));

        let seen = source.seen.lock().unwrap();
        assert_eq!(seen[0].to - seen[0].from, Duration::minutes(13));
        assert_eq!(seen[0].token, "99926000");
        assert_eq!(seen[0].interval, "1m");
    }

    #[tokio::test]
    async fn bad_rows_are_skipped_not_fatal() {
        let source = CannedSource::ok(vec![
            row("2024-01-02 09:15", 100.0),
            vec![json!("garbage"), json!(1), json!(1), json!(1), json!(1)],
            row("2024-01-02 09:16", 101.0),
        ]);
        let seeder = WarmStartSeeder::new(source, 10);
        let mut store = HistoryStore::new(25);

        let result = seeder.seed_at(&mut store, &nifty(), 20, now()).await;
        assert_eq!(result.seeded, 2);
        assert_eq!(result.rejected_rows, 1);
        assert!(result.needs_padding(20));
        assert_eq!(store.count("NIFTY"), 2);
    }

    #[tokio::test]
    async fn reseeding_replaces_previous_history() {
        let seeder = WarmStartSeeder::new(CannedSource::ok(vec![row("2024-01-02 09:15", 100.0)]), 10);
        let mut store = HistoryStore::new(25);
        store.append("NIFTY", Candle::from_tick(0, 1.0));
        store.append("NIFTY", Candle::from_tick(60_000, 2.0));

        seeder.seed_at(&mut store, &nifty(), 20, now()).await;
        assert_eq!(store.get_closes("NIFTY"), vec![100.0]);
    }

    #[tokio::test]
    async fn empty_fetch_leaves_store_untouched() {
        let seeder = WarmStartSeeder::new(CannedSource::ok(vec![]), 10);
        let mut store = HistoryStore::new(25);

        let result = seeder.seed_at(&mut store, &nifty(), 20, now()).await;
        assert_eq!(result.outcome, WarmStartOutcome::Empty);
        assert_eq!(store.count("NIFTY"), 0);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_clear() {
        let seeder = WarmStartSeeder::new(CannedSource::failing(), 10);
        let mut store = HistoryStore::new(25);
        store.append("NIFTY", Candle::from_tick(0, 1.0));

        let result = seeder.seed_at(&mut store, &nifty(), 20, now()).await;
        assert!(matches!(result.outcome, WarmStartOutcome::FetchFailed(_)));
        assert!(!result.is_success());
        assert_eq!(store.count("NIFTY"), 1);
    }

    #[tokio::test]
    async fn all_rows_invalid_leaves_store_untouched() {
        let seeder = WarmStartSeeder::new(
            CannedSource::ok(vec![vec![json!("nope"), json!(1), json!(1), json!(1), json!(1)]]),
            10,
        );
        let mut store = HistoryStore::new(25);
        store.append("NIFTY", Candle::from_tick(0, 1.0));

        let result = seeder.seed_at(&mut store, &nifty(), 20, now()).await;
        assert_eq!(result.outcome, WarmStartOutcome::Empty);
        assert_eq!(result.rejected_rows, 1);
        assert_eq!(store.count("NIFTY"), 1);
    }
}
