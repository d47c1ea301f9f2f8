use std::collections::{HashMap, VecDeque};

use crate::observation::build_observation;

/// Stateful observation builder fed one close at a time.
///
/// Keeps, per symbol, at most `window_size + 1` raw closes in arrival order
/// and starts producing observations once `max(2, min_history)` of them are
/// buffered. Independent of the engine's candle history.
#[derive(Debug, Clone)]
pub struct RealTimeFeatureBuilder {
    window_size: usize,
    min_history: usize,
    buffers: HashMap<String, VecDeque<f64>>,
}

impl RealTimeFeatureBuilder {
    /// `min_history` defaults to `window_size` when `None`.
    pub fn new(window_size: usize, min_history: Option<usize>) -> Self {
        Self {
            window_size,
            min_history: min_history.unwrap_or(window_size),
            buffers: HashMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Record `price` for `symbol` and return an observation if enough
    /// history is buffered.
    pub fn update(&mut self, symbol: &str, price: f64, position: f64) -> Option<Vec<f64>> {
        let capacity = self.window_size + 1;
        let required = self.min_history.max(2);
        let window_size = self.window_size;

        let buffer = self.buffer_mut(symbol);
        if buffer.len() == capacity {
            buffer.pop_front();
        }
        buffer.push_back(price);

        if buffer.len() < required {
            return None;
        }
        let prices: Vec<f64> = buffer.iter().copied().collect();
        build_observation(&prices, position, window_size)
    }

    /// Buffered closes for `symbol`, oldest first. Empty for unknown symbols.
    pub fn closes(&self, symbol: &str) -> Vec<f64> {
        self.buffers
            .get(symbol)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Clear one symbol's buffer (e.g. at a session boundary).
    pub fn reset_symbol(&mut self, symbol: &str) {
        if let Some(buffer) = self.buffers.get_mut(symbol) {
            buffer.clear();
        }
    }

    pub fn reset_all(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }
    }

    /// Explicit get-or-create of a symbol's buffer.
    fn buffer_mut(&mut self, symbol: &str) -> &mut VecDeque<f64> {
        let capacity = self.window_size + 1;
        self.buffers
            .entry(symbol.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_min_history() {
        let mut fb = RealTimeFeatureBuilder::new(3, None);
        assert!(fb.update("A", 100.0, 0.0).is_none());
        assert!(fb.update("A", 101.0, 0.0).is_none());
        let obs = fb.update("A", 102.0, 1.0).unwrap();
        assert_eq!(obs.len(), 4);
        assert_eq!(obs[3], 1.0);
    }

    #[test]
    fn min_history_below_two_still_needs_two_prices() {
        let mut fb = RealTimeFeatureBuilder::new(3, Some(0));
        assert!(fb.update("A", 100.0, 0.0).is_none());
        assert!(fb.update("A", 101.0, 0.0).is_some());
    }

    #[test]
    fn buffer_is_bounded_to_window_plus_one() {
        let mut fb = RealTimeFeatureBuilder::new(3, Some(2));
        for p in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            fb.update("A", p, 0.0);
        }
        assert_eq!(fb.closes("A"), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn symbols_are_independent() {
        let mut fb = RealTimeFeatureBuilder::new(2, Some(2));
        fb.update("A", 1.0, 0.0);
        assert!(fb.update("B", 1.0, 0.0).is_none());
        assert!(fb.update("A", 2.0, 0.0).is_some());
        assert_eq!(fb.closes("B"), vec![1.0]);
    }

    #[test]
    fn reset_symbol_and_reset_all() {
        let mut fb = RealTimeFeatureBuilder::new(3, Some(2));
        fb.update("A", 1.0, 0.0);
        fb.update("B", 1.0, 0.0);
        fb.reset_symbol("A");
        assert!(fb.closes("A").is_empty());
        assert_eq!(fb.closes("B"), vec![1.0]);
        fb.reset_all();
        assert!(fb.closes("B").is_empty());
        // reading an unknown symbol does not create it
        assert!(fb.closes("C").is_empty());
    }

    #[test]
    fn matches_pure_builder_over_buffer() {
        let mut fb = RealTimeFeatureBuilder::new(3, None);
        let mut last = None;
        for p in [101.0, 102.0, 103.0] {
            last = fb.update("A", p, 1.0);
        }
        assert_eq!(last, build_observation(&[101.0, 102.0, 103.0], 1.0, 3));
    }
}
