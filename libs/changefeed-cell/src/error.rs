use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChangefeedError {
    #[error("Subscription failed: {0}")]
    SubscriptionError(String),

    #[error("Changefeed transport unavailable: {0}")]
    TransportError(String),

    #[error("Filter column '{0}' is not indexed; refusing unbounded subscription")]
    UnindexedFilter(String),

    #[error("Changefeed bridge is shut down")]
    Closed,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
