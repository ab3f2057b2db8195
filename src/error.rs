use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Record store error: {message}")]
    Store { message: String },

    #[error("Source error: {message}")]
    Source { message: String },
}

impl IngestError {
    pub fn store(message: impl Into<String>) -> Self {
        IngestError::Store {
            message: message.into(),
        }
    }

    /// Fatal errors abort a whole batch; everything else is recorded
    /// per item and the pipeline continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Store { .. } | IngestError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
