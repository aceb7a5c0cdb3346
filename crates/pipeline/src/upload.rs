//! HTTP client for the scoring service.
//!
//! One multipart `POST` per run with a single `file` field. The response
//! body is handed back verbatim; interpreting it is the grader's job.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use regscore_core::capability::{SourcedImage, UploadError, Uploader};

/// Multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

/// Content type used when the sourcer did not report one.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Scoring service client. Safe to share between concurrent runs.
pub struct ScoringServiceClient {
    client: reqwest::Client,
    service_url: String,
}

impl ScoringServiceClient {
    /// Create a client posting to `service_url`.
    pub fn new(service_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            service_url,
        }
    }

    /// Post `image` as `multipart/form-data` and return the body text.
    pub async fn post_image(&self, image: SourcedImage) -> Result<String, UploadError> {
        let file_name = image.name().unwrap_or_default().to_string();
        let content_type = image.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();

        let part = Part::bytes(image.data)
            .file_name(file_name)
            .mime_str(&content_type)
            .map_err(|_| UploadError::InvalidContentType(content_type.clone()))?;
        let form = Form::new().part(FILE_FIELD, part);

        let response = self
            .client
            .post(&self.service_url)
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        let response = Self::ensure_success(response).await?;
        let body = response.text().await.map_err(request_error)?;

        tracing::debug!(bytes = body.len(), "Scoring service responded");
        Ok(body)
    }

    /// Turn a non-2xx response into [`UploadError::Status`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn request_error(err: reqwest::Error) -> UploadError {
    UploadError::Request(Box::new(err))
}

#[async_trait]
impl Uploader for ScoringServiceClient {
    async fn upload(&self, image: SourcedImage) -> Result<String, UploadError> {
        self.post_image(image).await
    }
}
