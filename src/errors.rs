use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration missing: '{0}' must be defined")]
    ConfigurationMissing(String),

    #[error("Unsupported database engine '{0}'; expected sqlite, spatialite, postgresql or postgis")]
    UnsupportedEngine(String),

    #[error("Dump failed ({engine}): {reason}")]
    DumpFailed { engine: &'static str, reason: String },

    #[error("Upload of '{key}' failed: {reason}")]
    UploadFailed { key: String, reason: String },

    #[error("Restore failed ({engine}): {reason}")]
    RestoreFailed { engine: &'static str, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Pruning failed for {} artifact(s): {}", failures.len(), failures.iter().map(|f| f.key.as_str()).collect::<Vec<_>>().join(", "))]
    PruneFailed { failures: Vec<PruneFailure> },

    #[error("Storage {operation} failed for '{key}': {reason}")]
    Storage {
        operation: &'static str,
        key: String,
        reason: String,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

/// One deletion that did not go through during a prune.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneFailure {
    pub key: String,
    pub reason: String,
}

impl AppError {
    pub(crate) fn storage(operation: &'static str, key: &str, reason: impl std::fmt::Display) -> Self {
        AppError::Storage {
            operation,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
