use thiserror::Error;

use crate::types::CampaignStatus;

pub type LoomResult<T> = Result<T, LoomError>;

#[derive(Error, Debug)]
pub enum LoomError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Counter store error: {0}")]
    Cache(String),

    #[error("Analytics sink error: {0}")]
    Analytics(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid campaign transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LoomError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
