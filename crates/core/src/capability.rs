//! The three collaborators a pipeline run calls, as injectable traits.
//!
//! The orchestrator only ever sees these traits, which keeps it ignorant
//! of the plugin transport, the HTTP stack and the script engine. Each
//! trait method is one of the run's suspension points.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::score::ScoreValue;

/// Metadata key carrying the image file name.
pub const META_NAME: &str = "name";
/// Metadata key carrying the image MIME type.
pub const META_CONTENT_TYPE: &str = "content-type";

/// One image handed over by a sourcer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedImage {
    pub data: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl SourcedImage {
    pub fn new(data: Vec<u8>, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_NAME.to_string(), name.into());
        metadata.insert(META_CONTENT_TYPE.to_string(), content_type.into());
        Self { data, metadata }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get(META_NAME).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get(META_CONTENT_TYPE).map(String::as_str)
    }
}

/// Why an image could not be sourced.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The sourcer answered with an error of its own.
    #[error("Sourcer reported: {0}")]
    Remote(String),

    /// The link to the sourcer process failed.
    #[error("Sourcer link I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The sourcer broke the wire protocol.
    #[error("Sourcer protocol violation: {0}")]
    Protocol(String),

    #[error("Sourcer timed out after {0:?}")]
    Timeout(Duration),
}

/// Why the scoring service upload failed.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The HTTP request itself failed (network, DNS, TLS, body read).
    #[error("HTTP request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The service answered with a non-2xx status.
    #[error("Scoring service error ({status}): {body}")]
    Status { status: u16, body: String },

    /// The sourcer's `content-type` metadata is not a valid MIME type.
    #[error("Invalid content type '{0}'")]
    InvalidContentType(String),

    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
}

/// Why the grading script did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The script raised or failed at runtime.
    #[error("Grader failed: {0}")]
    Runtime(String),

    /// The evaluation task died before returning.
    #[error("Grader evaluation aborted: {0}")]
    Aborted(String),

    #[error("Grader timed out after {0:?}")]
    Timeout(Duration),
}

/// Supplies one image per call. Dispensed once at startup.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn get_image(&self) -> Result<SourcedImage, SourceError>;
}

/// Posts an image to the scoring service and returns the body verbatim.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, image: SourcedImage) -> Result<String, UploadError>;
}

/// Turns a scoring service response into an opaque score.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, response: &str) -> Result<ScoreValue, ScriptError>;
}
