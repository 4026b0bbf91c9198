//! Error type shared across the workspace.

use thiserror::Error;

/// All errors produced by Matsuri components.
#[derive(Debug, Error)]
pub enum MatsuriError {
    /// Configuration loading or validation failure.
    #[error("Config error: {0}")]
    Config(String),

    /// Data store failure (query, migration, connection).
    #[error("Store error: {0}")]
    Store(String),

    /// Chat-platform delivery or API failure.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Gateway / webhook handling failure.
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MatsuriError>;
