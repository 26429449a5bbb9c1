//! Settings errors.

use thiserror::Error;

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Failure while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON or does not match the schema.
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}
