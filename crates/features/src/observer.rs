use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use common::{CandleClosed, TradingCalendar};

use crate::realtime::RealTimeFeatureBuilder;

/// Latest streaming observation per symbol, shared with the HTTP API.
pub type ObservationBoard = Arc<RwLock<HashMap<String, Vec<f64>>>>;

/// Feeds closed candles into a [`RealTimeFeatureBuilder`] and publishes the
/// resulting observations.
///
/// Buffers are cleared whenever a candle belongs to a different trading
/// session than the previous one.
pub struct FeatureObserver {
    builder: RealTimeFeatureBuilder,
    position: f64,
    calendar: Arc<dyn TradingCalendar>,
    last_session: Option<NaiveDate>,
    board: ObservationBoard,
}

impl FeatureObserver {
    pub fn new(
        builder: RealTimeFeatureBuilder,
        position: f64,
        calendar: Arc<dyn TradingCalendar>,
    ) -> Self {
        Self {
            builder,
            position,
            calendar,
            last_session: None,
            board: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn board(&self) -> ObservationBoard {
        self.board.clone()
    }

    /// Process one closed candle. Returns whether every buffer was reset for a
    /// new session, and the observation when the symbol's buffer is ready.
    pub fn process(&mut self, event: &CandleClosed) -> (bool, Option<Vec<f64>>) {
        let session = self.calendar.session_date(event.closed_at);
        let reset = matches!(self.last_session, Some(prev) if prev != session);
        if reset {
            info!(to = %session, "Session boundary, resetting feature buffers");
            self.builder.reset_all();
        }
        self.last_session = Some(session);

        let observation = self
            .builder
            .update(&event.symbol, event.candle.observed_close(), self.position);
        (reset, observation)
    }

    /// Run the observer loop until the candle broadcast closes.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self, mut candle_rx: broadcast::Receiver<CandleClosed>) {
        info!(window = self.builder.window_size(), "FeatureObserver running");
        loop {
            match candle_rx.recv().await {
                Ok(event) => {
                    let (reset, observation) = self.process(&event);
                    let mut board = self.board.write().await;
                    if reset {
                        board.clear();
                    }
                    match observation {
                        Some(obs) => {
                            debug!(symbol = %event.symbol, len = obs.len(), "Observation ready");
                            board.insert(event.symbol.clone(), obs);
                        }
                        None => {
                            board.remove(&event.symbol);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "FeatureObserver lagged, dropped candle events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Candle broadcast channel closed");
                    return;
                }
            }
        }
    }
}
