use thiserror::Error;

/// Failures that abort a whole processing run.
///
/// Per-row and per-student problems never surface here; they are collected
/// into the `errors` list of the run outcome instead.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{0}")]
    Format(String),

    #[error("Could not decode export with any supported encoding")]
    Decode,

    #[error("No valid participants found in export")]
    NoParticipants,

    #[error("Date must be in YYYY-MM-DD format: {0}")]
    InvalidDate(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
