use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueSyncError {
    #[error("Authorization error: {0}")]
    AuthorizationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store operation failed: {0}")]
    StoreError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<QueueSyncError> for shared_models::error::AppError {
    fn from(err: QueueSyncError) -> Self {
        use shared_models::error::AppError;
        match err {
            QueueSyncError::AuthorizationError(msg) => AppError::Forbidden(msg),
            QueueSyncError::ValidationError(msg) => AppError::ValidationError(msg),
            QueueSyncError::NotFound(msg) => AppError::NotFound(msg),
            QueueSyncError::StoreError(msg) => AppError::Database(msg),
            QueueSyncError::TransportError(msg) => AppError::Internal(msg),
            QueueSyncError::SerializationError(e) => AppError::Internal(e.to_string()),
        }
    }
}
