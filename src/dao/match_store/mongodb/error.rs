use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::storage::StorageError;

/// Result alias for MongoDB operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB backend before being folded into
/// [`StorageError`].
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save match `{id}`")]
    SaveMatch {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load match `{id}`")]
    LoadMatch {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete match `{id}`")]
    DeleteMatch {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to query matches")]
    QueryMatches {
        #[source]
        source: MongoError,
    },
    #[error("failed to write membership for user `{user_id}`")]
    WriteMembership {
        user_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load membership for user `{user_id}`")]
    LoadMembership {
        user_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to append discovery `{id}`")]
    SaveDiscovery {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load discoveries for match `{match_id}`")]
    LoadDiscoveries {
        match_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("stored document is malformed: {context}")]
    Decode { context: String },
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
