pub mod config;
pub mod error;
pub mod ports;
pub mod types;

pub use config::{Config, SymbolConfig, SymbolFileConfig};
pub use error::{Error, Result};
pub use ports::{DecisionSink, HistoricalSource, TradingCalendar};
pub use types::*;
