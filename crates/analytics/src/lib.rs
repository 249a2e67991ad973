//! Append-only sinks for impression and click records.

#![warn(clippy::unwrap_used)]

pub mod ledger;
pub mod logger;

pub use ledger::{MemoryLedger, RecordSink};
pub use logger::AnalyticsLogger;
