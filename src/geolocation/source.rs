use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::PositionFix;

/// Readings buffered between a source and its consumer before the source
/// waits.
pub const READING_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionError {
    #[error("Geolocation is not supported on this device.")]
    Unsupported,
    #[error("Location permission was denied.")]
    PermissionDenied,
    #[error("Timed out waiting for a location reading.")]
    Timeout,
}

impl PositionError {
    /// Permission and capability failures end the watch; a timeout only
    /// loses one reading.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PositionError::Unsupported | PositionError::PermissionDenied)
    }
}

pub type PositionReading = Result<PositionFix, PositionError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Oldest cached reading the source may hand back; 0 forces a fresh fix.
    pub maximum_age_ms: u64,
    /// Per-reading budget before the source reports `PositionError::Timeout`.
    pub timeout_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age_ms: 0,
            timeout_ms: 5_000,
        }
    }
}

impl WatchOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

type Release = Box<dyn FnOnce() + Send + 'static>;

struct WatchInner {
    token: CancellationToken,
    release: Mutex<Option<Release>>,
    released: AtomicBool,
}

impl WatchInner {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        let release = match self.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
        true
    }
}

impl Drop for WatchInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Ownership of a live position subscription.
///
/// The device resource is released exactly once: on the first `cancel()`, or
/// when the last clone is dropped. Later cancels are no-ops.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Arc<WatchInner>,
}

impl WatchHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(WatchInner {
                token: CancellationToken::new(),
                release: Mutex::new(Some(Box::new(release))),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Token the producing side listens on to stop emitting.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Returns `true` only for the call that actually released the watch.
    pub fn cancel(&self) -> bool {
        self.inner.release()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

pub struct PositionWatch {
    pub readings: mpsc::Receiver<PositionReading>,
    pub handle: WatchHandle,
}

impl PositionWatch {
    /// A watch that reports `err` once and then ends, for sources that
    /// cannot subscribe at all.
    pub fn failed(err: PositionError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(err));
        Self {
            readings: rx,
            handle: WatchHandle::new(|| {}),
        }
    }
}

/// Continuous positioning capability, injected into the clock flow.
///
/// Implementations must be called from inside a tokio runtime; most spawn a
/// producer task that stops when the handle's token is cancelled.
pub trait PositionSource: Send + Sync {
    fn watch(&self, options: &WatchOptions) -> PositionWatch;
}

/// Stands in for hosts without any positioning capability.
pub struct UnsupportedPositionSource;

impl PositionSource for UnsupportedPositionSource {
    fn watch(&self, _options: &WatchOptions) -> PositionWatch {
        PositionWatch::failed(PositionError::Unsupported)
    }
}
