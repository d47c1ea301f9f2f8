pub mod aggregator;
pub mod calendar;
pub mod feed;
pub mod history;
pub mod lifecycle;
pub mod stats;
pub mod trigger;
pub mod warm_start;
pub mod worker;

pub use aggregator::CandleAggregator;
pub use calendar::MarketCalendar;
pub use feed::{HttpDecisionSink, HttpHistoricalSource, TickFanout, TickStream, FANOUT_QUEUE};
pub use history::{HistoryStore, SymbolHistory};
pub use lifecycle::{Engine, EngineHandle, EngineSettings};
pub use stats::{PipelineStats, StatsSnapshot};
pub use trigger::{padded_closes, DecisionTrigger, PaddedCloses, SkipReason, TriggerOutcome};
pub use warm_start::WarmStartSeeder;
pub use worker::{SnapshotBoard, SymbolSnapshot, SymbolWorker};
