use thiserror::Error;

/// Failures at the persistence boundary. Transient variants are retried once
/// with jitter; everything else is handled per call site.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository call timed out")]
    Timeout,

    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The owning user row does not exist yet. The engine reacts by calling
    /// `ensure_user` and retrying the write once.
    #[error("foreign key missing for user")]
    ForeignKeyMissing,

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Timeout | RepositoryError::Unavailable(_)
        )
    }
}

/// Fatal engine failures. Unlike repository trouble, these abort the request:
/// a dimension mismatch or broken invariant means the analysis itself cannot
/// be trusted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
