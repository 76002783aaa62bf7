use thiserror::Error;

/// Common error types used across the scheduler and dispatcher.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A store write touched a different number of rows than the statement
    /// can legitimately touch. Logged loudly, contained per envelope.
    #[error("store inconsistency: {0}")]
    Inconsistent(String),
}
