//! Auto-campaigns: one base creative materialized into every zone that
//! matches a format, then scored and pruned by the optimizer.

#![warn(clippy::unwrap_used)]

pub mod error;
pub mod matcher;
pub mod optimizer;
pub mod store;
#[cfg(test)]
mod test_support;

pub use error::AutoCampaignError;
pub use matcher::{FormatMatcher, SyncReport};
pub use optimizer::{CampaignReport, OptimizationReport, Optimizer};
pub use store::AutoCampaignStore;
