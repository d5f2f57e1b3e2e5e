mod collector;
mod error;

pub use collector::{CollectorConfig, GarbageCollector, SweepReport};
pub use error::CollectorError;
