use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;
pub mod types;

pub use gemini::GeminiClient;
pub use types::{FileData, Turn, TurnRole};

#[derive(Debug, Error)]
pub enum GenAiError {
    #[error("request to generative ai service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned status {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("upload session did not return an upload url")]
    MissingUploadUrl,
    #[error("upload response did not include a file uri")]
    MissingFileUri,
    #[error("failed to read staged file: {0}")]
    Io(#[from] std::io::Error),
}

/// Text generation against a hosted model.
#[async_trait]
pub trait GenerativeModel: Send + Sync + 'static {
    /// Returns `Ok(None)` when the model answered but produced no usable text.
    async fn generate_content(&self, turns: &[Turn]) -> Result<Option<String>, GenAiError>;
}

/// Hosting for files the model can reference by URI.
#[async_trait]
pub trait FileHost: Send + Sync + 'static {
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<String, GenAiError>;
}
