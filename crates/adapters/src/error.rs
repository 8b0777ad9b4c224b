use book_core::{ImageSourceError, LanguageModelError};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("API returned an empty response")]
    EmptyResponse,
}

impl AdapterError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        AdapterError::InvalidConfig(message.into())
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        LanguageModelError::new(err)
    }
}

impl From<AdapterError> for ImageSourceError {
    fn from(err: AdapterError) -> Self {
        ImageSourceError::provider(err)
    }
}
