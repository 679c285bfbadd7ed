use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A conditional write lost a race: the stored revision no longer matches
    /// the revision the caller read. The caller must re-read and retry.
    #[error("write conflict on match `{id}` (expected revision {expected}, found {actual})")]
    WriteConflict { id: Uuid, expected: u64, actual: u64 },
    /// The targeted match document does not exist (stale id or concurrent delete).
    #[error("match `{id}` not found in storage")]
    MatchMissing { id: Uuid },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// True when re-reading the document and retrying the write can succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::WriteConflict { .. })
    }
}
