use thiserror::Error;

/// Categorized errors for the guard crate.
///
/// Policy outcomes (SSRF blocks, missing approvals, size caps) are *not*
/// errors; they surface as ordinary `GuardResult`s. This enum covers the
/// cases where no result can be produced at all.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("path escapes base directory: {0}")]
    PathEscape(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal pipeline error in stage {stage}: {message}")]
    Stage { stage: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, GuardError>;
