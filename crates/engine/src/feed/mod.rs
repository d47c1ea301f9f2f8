//! Transport adapters: tick WebSocket in, HTTP historical candles and
//! decision dispatch out, plus optional per-tick telemetry.

pub mod fanout;
pub mod rest;
pub mod stream;

pub use fanout::{TickFanout, FANOUT_QUEUE};
pub use rest::{HttpDecisionSink, HttpHistoricalSource};
pub use stream::TickStream;
