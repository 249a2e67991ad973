#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;
pub mod store;

pub use client::RedisCounters;
pub use local::LocalCounters;
pub use store::{AdCounters, CounterKind, CounterStore, DedupKey};
