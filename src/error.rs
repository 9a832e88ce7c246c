use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttachError {
    /// One or more required columns could not be matched to any input header.
    #[error("Missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for AttachError {
    fn from(err: polars::error::PolarsError) -> Self {
        AttachError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AttachError>;
