use std::{
    io,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use log::{info, warn};

use super::{CaptureError, CapturedImage, ImageCapture};

// Anything smaller is a truncated write from the snapshot tool.
const MIN_FRAME_BYTES: usize = 64;

/// Reads frames from a still image that an external camera tool keeps
/// refreshing on disk.
pub struct FileCapture {
    path: PathBuf,
    stream_ready: AtomicBool,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream_ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.stream_ready.load(Ordering::SeqCst)
    }
}

fn map_io(err: io::Error) -> CaptureError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
        _ => CaptureError::DeviceUnavailable(err.to_string()),
    }
}

#[async_trait]
impl ImageCapture for FileCapture {
    async fn start_capture(&self) -> Result<(), CaptureError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(map_io)?;
        if !metadata.is_file() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is not a file",
                self.path.display()
            )));
        }
        self.stream_ready.store(true, Ordering::SeqCst);
        info!("Capture stream ready from {}", self.path.display());
        Ok(())
    }

    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        if !self.is_ready() {
            return Err(CaptureError::DeviceUnavailable(
                "capture stream not started".into(),
            ));
        }

        let bytes = tokio::fs::read(&self.path).await.map_err(map_io)?;
        if bytes.len() < MIN_FRAME_BYTES {
            warn!(
                "Frame from {} is only {} bytes; refusing it",
                self.path.display(),
                bytes.len()
            );
            return Err(CaptureError::DeviceUnavailable(format!(
                "frame too small ({} bytes)",
                bytes.len()
            )));
        }

        let (bytes, format) = tokio::task::spawn_blocking(move || {
            let format = image::guess_format(&bytes)
                .map_err(|err| CaptureError::DeviceUnavailable(err.to_string()))?;
            image::load_from_memory_with_format(&bytes, format)
                .map_err(|err| CaptureError::DeviceUnavailable(err.to_string()))?;
            Ok::<_, CaptureError>((bytes, format))
        })
        .await
        .map_err(|err| CaptureError::DeviceUnavailable(format!("decode worker failed: {err}")))??;

        info!(
            "Captured {} frame ({} bytes)",
            format.to_mime_type(),
            bytes.len()
        );
        Ok(CapturedImage::new(bytes, format))
    }

    async fn reset(&self) {
        if self.stream_ready.swap(false, Ordering::SeqCst) {
            info!("Capture stream released");
        }
    }
}
