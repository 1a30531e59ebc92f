use thiserror::Error;

use crate::diff::{ApplyError, DiffError};

#[derive(Error, Debug)]
pub enum PipefixError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("GitLab API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    #[error("Incident {0} has no valid patch to publish")]
    NoValidPatch(String),

    #[error("Incident {0} already has an open merge request")]
    ChangeRequestAlreadyOpen(String),

    #[error("Patch validation failed: {0}")]
    Validation(#[from] DiffError),

    #[error("Patch application failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipefixError>;
