use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock backend not configured: {0}")]
    NotConfigured(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LockResult<T> = Result<T, LockError>;
