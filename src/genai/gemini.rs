use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::json;
use tracing::{debug, error, info};

use super::types::{GenerateContentRequest, GenerateContentResponse, UploadFileResponse};
use super::{FileHost, GenAiError, GenerativeModel, Turn};
use crate::config::AppConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Client for the Gemini REST API, covering both content generation and the file API.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenAiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, GenAiError> {
        Self::new(
            config.gemini_api_base.clone(),
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
            Duration::from_secs(config.gemini_timeout_secs),
        )
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        )
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.api_base)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate_content(&self, turns: &[Turn]) -> Result<Option<String>, GenAiError> {
        let payload = GenerateContentRequest::from_turns(turns);
        debug!(model = %self.model, turns = turns.len(), "sending generateContent request");

        let response = self
            .http
            .post(self.generate_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = ensure_success(response, "generateContent").await?;

        let parsed: GenerateContentResponse = response.json().await?;
        Ok(parsed.reply_text())
    }
}

#[async_trait]
impl FileHost for GeminiClient {
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<String, GenAiError> {
        let bytes = tokio::fs::read(path).await?;
        let size = bytes.len();

        let start = self
            .http
            .post(self.upload_url())
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = ensure_success(start, "file upload start").await?;

        let session_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or(GenAiError::MissingUploadUrl)?;

        let finalize = self
            .http
            .post(session_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let finalize = ensure_success(finalize, "file upload finalize").await?;

        let uploaded: UploadFileResponse = finalize.json().await?;
        let uri = uploaded
            .file
            .uri
            .filter(|uri| !uri.is_empty())
            .ok_or(GenAiError::MissingFileUri)?;

        info!(
            file_uri = %uri,
            file_name = uploaded.file.name.as_deref().unwrap_or_default(),
            size_bytes = size,
            "uploaded file to gemini"
        );
        Ok(uri)
    }
}

async fn ensure_success(response: Response, operation: &'static str) -> Result<Response, GenAiError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(%status, body = %body, operation, "gemini request failed");
    Err(GenAiError::Api {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoints_without_double_slashes() {
        let client = GeminiClient::new(
            "https://generativelanguage.googleapis.com/",
            "key",
            "gemini-2.5-flash-lite",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.generate_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
        assert_eq!(
            client.upload_url(),
            "https://generativelanguage.googleapis.com/upload/v1beta/files"
        );
    }
}
