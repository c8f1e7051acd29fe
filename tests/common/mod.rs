//! Shared fixtures for the clock flow integration tests

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use image::ImageFormat;
use tokio::sync::broadcast;

use clockpoint_lib::{
    capture::{CaptureError, CapturedImage, ImageCapture},
    clock::{ClockEventSubmitter, ClockFlowController, SubmitError, SubmitReceipt},
    events::{EventBus, FlowEvent},
    geolocation::ScriptedPositionSource,
    models::ClockEventPayload,
    settings::{ClockSettings, SettingsStore},
};

pub const SELFIE_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

/// Camera stand-in that hands back a fixed frame once started.
pub struct StubCapture {
    pub starts: AtomicUsize,
    pub captures: AtomicUsize,
    pub resets: AtomicUsize,
    ready: AtomicBool,
    fail_start: Option<CaptureError>,
}

impl StubCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            fail_start: None,
        })
    }

    pub fn failing(err: CaptureError) -> Arc<Self> {
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            fail_start: Some(err),
        })
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCapture for StubCapture {
    async fn start_capture(&self) -> Result<(), CaptureError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_start {
            return Err(err.clone());
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if !self.ready.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable("stream not ready".into()));
        }
        Ok(CapturedImage::new(SELFIE_BYTES.to_vec(), ImageFormat::Png))
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }
}

/// Records every payload; optionally slow, optionally failing the first N
/// calls.
pub struct RecordingSubmitter {
    payloads: Mutex<Vec<ClockEventPayload>>,
    delay: Duration,
    failures_remaining: AtomicUsize,
}

impl RecordingSubmitter {
    pub fn new() -> Arc<Self> {
        Self::with(Duration::ZERO, 0)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::with(delay, 0)
    }

    pub fn failing_first(failures: usize) -> Arc<Self> {
        Self::with(Duration::ZERO, failures)
    }

    fn with(delay: Duration, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
            delay,
            failures_remaining: AtomicUsize::new(failures),
        })
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<ClockEventPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClockEventSubmitter for RecordingSubmitter {
    async fn submit_clock_event(
        &self,
        payload: &ClockEventPayload,
    ) -> Result<SubmitReceipt, SubmitError> {
        self.payloads.lock().unwrap().push(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SubmitError::Server {
                status: 503,
                message: "service unavailable".into(),
            });
        }

        Ok(SubmitReceipt {
            event_id: Some(format!("evt-{}", self.calls())),
            received_at: Utc::now(),
        })
    }
}

pub fn settings_with(tweak: impl FnOnce(&mut ClockSettings)) -> Arc<SettingsStore> {
    let mut settings = ClockSettings::default();
    tweak(&mut settings);
    Arc::new(SettingsStore::in_memory(settings))
}

pub fn controller(
    source: &ScriptedPositionSource,
    capture: &Arc<StubCapture>,
    submitter: &Arc<RecordingSubmitter>,
    settings: Arc<SettingsStore>,
) -> ClockFlowController {
    ClockFlowController::new(
        Arc::new(source.clone()),
        capture.clone(),
        submitter.clone(),
        settings,
        EventBus::new(),
    )
}

/// Single fix after 10ms, then silence.
pub fn single_fix(lat: f64, lon: f64, accuracy: f64) -> ScriptedPositionSource {
    ScriptedPositionSource::from_fixes(Duration::from_millis(10), &[(lat, lon, accuracy)])
}

pub fn drain(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
