use thiserror::Error;

/// Scheduler error taxonomy. All variants surface to the immediate caller;
/// retry-on-conflict policy lives with the caller, not in here.
#[derive(Debug, Error)]
pub enum SrsError {
    #[error("invalid rating '{0}' (expected one of: again, hard, good, easy)")]
    InvalidRating(String),

    #[error("card {0} not found")]
    CardNotFound(i64),

    #[error("stale commit: the card changed since it was read, retry with a fresh read")]
    StaleCommit,

    #[error("review time is implausibly far in the future")]
    ClockSkew,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SrsError>;
