use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by match stores regardless of the backend behind them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or timed out.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The match could not be turned into a document.
    #[error("document for match {0} could not be encoded")]
    Encoding(uuid::Uuid, #[source] serde_json::Error),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
