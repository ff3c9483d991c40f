//! Domain error types.

use chrono::{DateTime, Utc};

/// Top-level error type for sigtrader.
#[derive(Debug, thiserror::Error)]
pub enum SigtraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {asset_id}")]
    NoData { asset_id: String },

    #[error("insufficient history for {asset_id}: have {available}, need {required}")]
    InsufficientHistory {
        asset_id: String,
        available: usize,
        required: usize,
    },

    #[error("alignment error for {asset_id} at {timestamp}: {reason}")]
    Alignment {
        asset_id: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("invalid timestamp grid for {asset_id}: {reason}")]
    InvalidGrid { asset_id: String, reason: String },

    #[error("model error: {reason}")]
    Model { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SigtraderError {
    pub(crate) fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        SigtraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&SigtraderError> for std::process::ExitCode {
    fn from(err: &SigtraderError) -> Self {
        let code: u8 = match err {
            SigtraderError::Io(_) => 1,
            SigtraderError::ConfigParse { .. }
            | SigtraderError::ConfigMissing { .. }
            | SigtraderError::ConfigInvalid { .. } => 2,
            SigtraderError::Data { .. } | SigtraderError::NoData { .. } => 3,
            SigtraderError::Model { .. } => 4,
            SigtraderError::InsufficientHistory { .. }
            | SigtraderError::Alignment { .. }
            | SigtraderError::InvalidGrid { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
