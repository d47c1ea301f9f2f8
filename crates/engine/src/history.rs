use std::collections::{HashMap, VecDeque};

use common::Candle;

/// Bounded, ordered sequence of closed candles for one symbol, oldest first.
///
/// Appends go to the tail; once `capacity` is reached the head is evicted.
#[derive(Debug, Clone)]
pub struct SymbolHistory {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl SymbolHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    /// Externally-visible closes, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(Candle::observed_close).collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}

/// Per-symbol candle histories sharing one capacity.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    capacity: usize,
    symbols: HashMap<String, SymbolHistory>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            symbols: HashMap::new(),
        }
    }

    /// `max(window_size + margin, window_size + 1)`: enough to always serve a
    /// full close sequence once warmed up.
    pub fn capacity_for(window_size: usize, margin: usize) -> usize {
        (window_size + margin).max(window_size + 1)
    }

    pub fn append(&mut self, symbol: &str, candle: Candle) {
        self.symbol_mut(symbol).push(candle);
    }

    pub fn get_closes(&self, symbol: &str) -> Vec<f64> {
        self.symbols
            .get(symbol)
            .map(SymbolHistory::closes)
            .unwrap_or_default()
    }

    pub fn count(&self, symbol: &str) -> usize {
        self.symbols.get(symbol).map_or(0, SymbolHistory::len)
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolHistory> {
        self.symbols.get(symbol)
    }

    /// Drop every candle for `symbol`. Only used before live ticks flow.
    pub fn clear(&mut self, symbol: &str) {
        if let Some(history) = self.symbols.get_mut(symbol) {
            history.clear();
        }
    }

    /// Move one symbol's history out, e.g. to hand it to its worker.
    pub fn take(&mut self, symbol: &str) -> Option<SymbolHistory> {
        self.symbols.remove(symbol)
    }

    pub fn insert(&mut self, symbol: impl Into<String>, history: SymbolHistory) {
        self.symbols.insert(symbol.into(), history);
    }

    /// Explicit get-or-create; reads never create entries.
    fn symbol_mut(&mut self, symbol: &str) -> &mut SymbolHistory {
        let capacity = self.capacity;
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolHistory::new(capacity))
    }
}
