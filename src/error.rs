/// Error taxonomy for the triage core
///
/// Layer errors (`SubstrateError`, `ProviderError`, `ConfigError`) stay close to
/// the code that raises them. `TriageError` is what reaches the presentation
/// layer, so it is `Clone` and carries only strings.
use std::path::PathBuf;
use thiserror::Error;

use crate::media::{Authorization, Tier};

/// Failures of the durable key/value substrate
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("substrate unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by an asset provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("photo library access not granted ({0:?})")]
    Unauthorized(Authorization),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("failed to decode {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("delete failed ({reason}) and {count} files could not be put back; they are in {}", .staging.display())]
    Stranded {
        count: usize,
        staging: PathBuf,
        reason: String,
    },
}

/// Failures while reading or writing the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not determine the user config directory")]
    NoConfigDir,
}

/// Errors surfaced to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriageError {
    #[error("photo library access not granted ({status:?})")]
    PermissionDenied { status: Authorization },

    #[error("triage state could not be saved, continuing in memory: {reason}")]
    StoreUnavailable { reason: String },

    #[error("failed to load {tier:?} image for {id}: {reason}")]
    ImageLoadFailed { id: String, tier: Tier, reason: String },

    #[error("failed to delete {count} photos: {reason}")]
    DeletionFailed { count: usize, reason: String },

    #[error("media provider error: {reason}")]
    Provider { reason: String },
}

impl From<SubstrateError> for TriageError {
    fn from(err: SubstrateError) -> Self {
        TriageError::StoreUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<ProviderError> for TriageError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized(status) => TriageError::PermissionDenied { status },
            other => TriageError::Provider {
                reason: other.to_string(),
            },
        }
    }
}

impl TriageError {
    /// Only a permission failure makes triage unusable until resolved.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TriageError::PermissionDenied { .. })
    }
}
