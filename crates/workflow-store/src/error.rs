use thiserror::Error;

/// Errors that can occur when interacting with the workflow store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A record with the same key already exists.
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    /// The step catalog definition is inconsistent.
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A stored value could not be interpreted.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The store was told to fail this operation (in-memory store only).
    #[error("Injected failure: {0}")]
    Injected(&'static str),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn already_exists(entity: &'static str, key: impl ToString) -> Self {
        StoreError::AlreadyExists {
            entity,
            key: key.to_string(),
        }
    }
}

/// Result type for workflow store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
