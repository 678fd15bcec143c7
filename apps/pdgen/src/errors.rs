use thiserror::Error;

/// Application-level error type.
///
/// Everything here is fatal to the batch: it aborts before (or instead of)
/// processing rows. Per-row failures live in `GenerationError` and never
/// surface as an `AppError`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Process exit code for this error. Configuration and input problems are
    /// distinguished from runtime I/O failures so wrapper scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Input(_) | AppError::Csv(_) => 3,
            AppError::Io(_) | AppError::Json(_) | AppError::Internal(_) => 1,
        }
    }
}
