use loomads_core::LoomError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AutoCampaignError {
    #[error("auto-campaign not found: {0}")]
    AutoCampaignNotFound(Uuid),

    #[error("auto-campaign format not found: {0}")]
    FormatNotFound(Uuid),

    #[error("counter store error: {0}")]
    Counters(#[source] anyhow::Error),

    #[error(transparent)]
    Catalog(#[from] LoomError),
}
