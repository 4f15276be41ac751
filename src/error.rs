use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for shardfuse
#[derive(Error, Debug)]
pub enum ShardfuseError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Request rejected before any shard work started
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    /// Fusion parameters or strategy rejected at validation time
    #[error("Invalid fusion configuration: {0}")]
    InvalidFusion(String),

    /// One or more shards failed; every shard task was drained first
    #[error("Shard '{shard}' failed: {message} ({} shard error(s) total)", errors.len())]
    ShardFailure {
        shard: String,
        message: String,
        errors: BTreeMap<String, String>,
    },

    /// Error reported by a single shard executor
    #[error("Executor error in '{index}': {message}")]
    Executor { index: String, message: String },

    /// Two aggregation trees expected to share a shape diverged
    #[error("Aggregation shape mismatch at '{path}': {detail}")]
    ShapeMismatch { path: String, detail: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShardfuseError {
    pub(crate) fn shape(path: impl Into<String>, detail: impl Into<String>) -> Self {
        ShardfuseError::ShapeMismatch {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Whether the error was raised before any shard was contacted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ShardfuseError::InvalidRequest(_) | ShardfuseError::InvalidFusion(_)
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for shardfuse operations
pub type Result<T> = std::result::Result<T, ShardfuseError>;
