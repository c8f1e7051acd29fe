pub mod file;

use async_trait::async_trait;
use image::ImageFormat;
use serde::Serialize;
use thiserror::Error;

pub use file::FileCapture;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureError {
    #[error("Camera access was denied. Please ensure camera access is allowed.")]
    PermissionDenied,
    #[error("Camera is unavailable: {0}")]
    DeviceUnavailable(String),
}

/// A still frame from the capture device, already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl CapturedImage {
    pub fn new(data: Vec<u8>, format: ImageFormat) -> Self {
        Self { data, format }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Camera collaborator seen by the clock flow. `start_capture` opens the
/// stream, `capture` grabs one frame, `reset` drops the frame and releases the
/// stream.
#[async_trait]
pub trait ImageCapture: Send + Sync {
    async fn start_capture(&self) -> Result<(), CaptureError>;

    async fn capture(&self) -> Result<CapturedImage, CaptureError>;

    async fn reset(&self);
}
