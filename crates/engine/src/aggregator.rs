use std::collections::HashMap;

use common::{floor_to_minute, Candle};

use crate::history::HistoryStore;

/// Turns ticks into closed one-minute candles, per symbol.
///
/// Holds at most one open candle per symbol. A tick in a later minute closes
/// the open candle, stamps it with the tick's price as `boundary_snapshot`,
/// appends it to the owned [`HistoryStore`] and returns it.
///
/// Ticks whose minute is earlier than the open candle's are merged into the
/// open candle instead of reopening an older bucket, so a symbol's candle
/// start times never move backwards.
#[derive(Debug)]
pub struct CandleAggregator {
    open: HashMap<String, Candle>,
    history: HistoryStore,
}

impl CandleAggregator {
    pub fn new(history: HistoryStore) -> Self {
        Self {
            open: HashMap::new(),
            history,
        }
    }

    pub fn add_tick(&mut self, symbol: &str, price: f64, timestamp_ms: i64) -> Option<Candle> {
        let bucket_start = floor_to_minute(timestamp_ms);

        if let Some(current) = self.open.get_mut(symbol) {
            if bucket_start <= current.start_ts {
                current.high = current.high.max(price);
                current.low = current.low.min(price);
                current.close = price;
                current.volume += 1.0;
                return None;
            }

            let mut closed = std::mem::replace(current, Candle::from_tick(bucket_start, price));
            closed.boundary_snapshot = price;
            self.history.append(symbol, closed);
            return Some(closed);
        }

        self.open
            .insert(symbol.to_string(), Candle::from_tick(bucket_start, price));
        None
    }

    pub fn open_candle(&self, symbol: &str) -> Option<&Candle> {
        self.open.get(symbol)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_040_000; // minute-aligned

    fn agg() -> CandleAggregator {
        CandleAggregator::new(HistoryStore::new(25))
    }

    #[test]
    fn first_tick_opens_candle() {
        let mut a = agg();
        assert!(a.add_tick("A", 100.0, T0 + 1_234).is_none());
        let c = a.open_candle("A").unwrap();
        assert_eq!(c.start_ts, T0);
        assert_eq!((c.open, c.high, c.low, c.close), (100.0, 100.0, 100.0, 100.0));
        assert_eq!(c.volume, 1.0);
        assert_eq!(c.boundary_snapshot, 0.0);
        assert_eq!(a.history().count("A"), 0);
    }

    #[test]
    fn same_minute_updates_in_place() {
        let mut a = agg();
        a.add_tick("A", 100.0, T0);
        assert!(a.add_tick("A", 103.0, T0 + 10_000).is_none());
        assert!(a.add_tick("A", 98.0, T0 + 59_999).is_none());
        let c = a.open_candle("A").unwrap();
        assert_eq!((c.open, c.high, c.low, c.close), (100.0, 103.0, 98.0, 98.0));
        assert_eq!(c.volume, 3.0);
        assert_eq!(a.history().count("A"), 0);
    }

    #[test]
    fn rollover_closes_with_boundary_snapshot() {
        let mut a = agg();
        a.add_tick("A", 100.0, T0);
        a.add_tick("A", 101.0, T0 + 30_000);
        let closed = a.add_tick("A", 105.0, T0 + 60_500).expect("candle closed");

        assert_eq!(closed.start_ts, T0);
        assert_eq!(closed.close, 101.0);
        assert_eq!(closed.boundary_snapshot, 105.0);
        assert_eq!(a.history().count("A"), 1);
        assert_eq!(a.history().get_closes("A"), vec![105.0]);

        let open = a.open_candle("A").unwrap();
        assert_eq!(open.start_ts, T0 + 60_000);
        assert_eq!(open.open, 105.0);
        assert_eq!(open.volume, 1.0);
        assert_eq!(open.boundary_snapshot, 0.0);
    }

    #[test]
    fn gap_of_several_minutes_closes_exactly_once() {
        let mut a = agg();
        a.add_tick("A", 100.0, T0);
        assert!(a.add_tick("A", 110.0, T0 + 5 * 60_000).is_some());
        assert_eq!(a.history().count("A"), 1);
        assert_eq!(a.open_candle("A").unwrap().start_ts, T0 + 5 * 60_000);
    }

    #[test]
    fn symbols_do_not_interfere() {
        let mut a = agg();
        a.add_tick("A", 100.0, T0);
        a.add_tick("B", 50.0, T0 + 60_000);
        assert!(a.add_tick("A", 101.0, T0 + 1_000).is_none());
        assert_eq!(a.history().count("B"), 0);
        assert_eq!(a.open_candle("B").unwrap().open, 50.0);
    }

    /// Backdated ticks are merged into the open candle rather than rejected
    /// or routed to the bucket they belong to.
    #[test]
    fn backdated_tick_merges_into_open_candle() {
        let mut a = agg();
        a.add_tick("A", 100.0, T0 + 60_000);
        assert!(a.add_tick("A", 90.0, T0).is_none());
        let c = a.open_candle("A").unwrap();
        assert_eq!(c.start_ts, T0 + 60_000);
        assert_eq!(c.low, 90.0);
        assert_eq!(c.close, 90.0);
        assert_eq!(c.volume, 2.0);
        assert_eq!(a.history().count("A"), 0);
    }

    #[test]
    fn zero_price_is_accepted() {
        let mut a = agg();
        a.add_tick("A", 100.0, T0);
        assert!(a.add_tick("A", 0.0, T0 + 1).is_none());
        assert_eq!(a.open_candle("A").unwrap().low, 0.0);
    }

    #[test]
    fn history_is_bounded_by_store_capacity() {
        let mut a = CandleAggregator::new(HistoryStore::new(3));
        for m in 0..10 {
            a.add_tick("A", 100.0 + m as f64, T0 + m * 60_000);
        }
        assert_eq!(a.history().count("A"), 3);
        assert_eq!(a.history().get_closes("A"), vec![107.0, 108.0, 109.0]);
    }
}
