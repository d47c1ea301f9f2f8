//! Observation building for the decision model.
//!
//! An observation is `window_size` normalized one-step returns (oldest first)
//! followed by a caller-supplied position flag.

pub mod observation;
pub mod observer;
pub mod realtime;

pub use observation::build_observation;
pub use observer::{FeatureObserver, ObservationBoard};
pub use realtime::RealTimeFeatureBuilder;
