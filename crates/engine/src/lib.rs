//! Ad decision engine: candidate lookup, eligibility filters, caps and
//! weighted selection for a single zone request.

#![warn(clippy::unwrap_used)]

pub mod caps;
pub mod catalog;
pub mod decision;
pub mod filters;
#[cfg(test)]
mod fixtures;
pub mod registry;
pub mod selector;

pub use caps::CapTracker;
pub use catalog::{CampaignCatalog, Candidate};
pub use decision::{DecisionEngine, DecisionError};
pub use filters::FilterChain;
pub use registry::ZoneRegistry;
pub use selector::WeightedSelector;
