#![warn(clippy::unwrap_used)]

pub mod auto;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod targeting;
pub mod types;

pub use config::AppConfig;
pub use error::{LoomError, LoomResult};
pub use snapshot::CatalogSnapshot;
pub use targeting::TargetingRule;
