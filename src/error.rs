/*!
 * Error types for Rugwatch
 */

use rugwatch_core_guard::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Store backend error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Upstream provider failure (timeout, non-2xx, network error)
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
