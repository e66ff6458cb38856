use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias for MongoDB record store operations.
pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// A required environment variable is unset.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The client could not be built from its options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// No ping succeeded while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Ping attempts made.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// Periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Index creation failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Target collection.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading a record failed.
    #[error("failed to read record `{key}`")]
    ReadRecord {
        /// Record key.
        key: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Writing a record failed.
    #[error("failed to write record `{key}`")]
    WriteRecord {
        /// Record key.
        key: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Deleting a record failed.
    #[error("failed to delete record `{key}`")]
    DeleteRecord {
        /// Record key.
        key: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Listing keys failed.
    #[error("failed to scan records with prefix `{prefix}`")]
    ScanRecords {
        /// Scanned key prefix.
        prefix: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
}
