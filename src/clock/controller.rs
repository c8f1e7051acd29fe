use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    capture::ImageCapture,
    events::{EmployeeReclassified, EventBus, FlowEvent, Notification},
    geolocation::{AccuracyRefiner, AccuracyState, PositionSource, RefinementSession},
    models::{ClockDirection, FlowContext},
    settings::SettingsStore,
};

use super::{
    state::{FlowState, FlowStatus},
    submit::{ClockEventSubmitter, SubmitReceipt},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub state: FlowState,
    pub has_image: bool,
    pub can_submit: bool,
    pub can_override: bool,
}

impl FlowSnapshot {
    fn from_state(state: &FlowState) -> Self {
        Self {
            state: state.clone(),
            has_image: state.has_image(),
            can_submit: state.can_submit(),
            can_override: state.can_override(),
        }
    }

    pub fn status(&self) -> FlowStatus {
        self.state.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(SubmitReceipt),
    Failed(String),
    /// A submission for this attempt was already in flight.
    Ignored,
}

/// Background work owned by one attempt. Released as a unit, and only by
/// whoever still holds the matching attempt id.
struct AttemptResources {
    attempt_id: String,
    session: RefinementSession,
    accuracy_watcher: JoinHandle<()>,
    capture_start: Option<JoinHandle<()>>,
}

impl AttemptResources {
    async fn shutdown(mut self) {
        if let Some(handle) = self.capture_start.take() {
            handle.abort();
        }
        self.accuracy_watcher.abort();
        self.session.stop().await;
    }
}

/// Drives one clock attempt at a time: location refinement and selfie
/// capture run side by side, and submission is gated on both.
#[derive(Clone)]
pub struct ClockFlowController {
    state: Arc<Mutex<FlowState>>,
    attempt: Arc<Mutex<Option<AttemptResources>>>,
    capture_gate: Arc<Mutex<()>>,
    positions: Arc<dyn PositionSource>,
    capture: Arc<dyn ImageCapture>,
    submitter: Arc<dyn ClockEventSubmitter>,
    settings: Arc<SettingsStore>,
    events: EventBus,
}

fn action_label(direction: ClockDirection) -> &'static str {
    match direction {
        ClockDirection::In => "Clock in",
        ClockDirection::Out => "Clock out",
    }
}

impl ClockFlowController {
    pub fn new(
        positions: Arc<dyn PositionSource>,
        capture: Arc<dyn ImageCapture>,
        submitter: Arc<dyn ClockEventSubmitter>,
        settings: Arc<SettingsStore>,
        events: EventBus,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(FlowState::new())),
            attempt: Arc::new(Mutex::new(None)),
            capture_gate: Arc::new(Mutex::new(())),
            positions,
            capture,
            submitter,
            settings,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn snapshot(&self) -> FlowSnapshot {
        let guard = self.state.lock().await;
        FlowSnapshot::from_state(&guard)
    }

    /// Starts a fresh attempt for `context`. Anything left from a previous
    /// attempt (fix, selfie, override, watch) is dropped first.
    pub async fn open(&self, context: FlowContext) -> Result<FlowSnapshot> {
        if context.employee_id.trim().is_empty() {
            bail!("no employee selected");
        }

        self.release_attempt(None).await;

        let settings = self.settings.clock();
        let attempt_id = Uuid::new_v4().to_string();

        {
            let mut state = self.state.lock().await;
            state.begin_attempt(
                attempt_id.clone(),
                context.clone(),
                settings.accuracy.clone(),
                Utc::now(),
            );
        }

        let session = AccuracyRefiner::start(
            self.positions.as_ref(),
            &settings.positioning.watch,
            settings.refiner_config(),
        );
        let accuracy_rx = session.subscribe();
        let resources = AttemptResources {
            attempt_id: attempt_id.clone(),
            session,
            accuracy_watcher: self.spawn_accuracy_watcher(attempt_id.clone(), accuracy_rx),
            capture_start: Some(self.spawn_capture_start(attempt_id.clone())),
        };
        let replaced = self.attempt.lock().await.replace(resources);
        if let Some(replaced) = replaced {
            log_warn!("Attempt {} was still live when {} opened", replaced.attempt_id, attempt_id);
            replaced.shutdown().await;
        }

        log_info!(
            "Opened {} attempt {} for employee {} at site {}",
            context.direction.as_str(),
            attempt_id,
            context.employee_id,
            context.site_id
        );

        Ok(self.emit_state_changed().await)
    }

    /// Grabs the selfie for the open attempt. Concurrent calls are
    /// serialized; only the first one captures.
    pub async fn capture_image(&self) -> Result<FlowSnapshot> {
        let _gate = self.capture_gate.lock().await;

        let attempt_id = {
            let state = self.state.lock().await;
            match state.status {
                FlowStatus::AwaitingCapture => {}
                FlowStatus::Idle => bail!("no clock attempt is open"),
                _ => bail!("a selfie was already captured; retake it instead"),
            }
            state
                .attempt_id
                .clone()
                .ok_or_else(|| anyhow!("no clock attempt is open"))?
        };

        // The stream has to be up before a frame can be grabbed.
        let start = self
            .attempt
            .lock()
            .await
            .as_mut()
            .filter(|resources| resources.attempt_id == attempt_id)
            .and_then(|resources| resources.capture_start.take());
        if let Some(start) = start {
            if let Err(err) = start.await {
                if !err.is_cancelled() {
                    log_error!("Camera start task for attempt {} failed: {err}", attempt_id);
                }
            }
        }

        let result = self.capture.capture().await;

        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.is_attempt(&attempt_id) {
                log_warn!("Discarding capture for closed attempt {}", attempt_id);
                bail!("clock attempt was closed");
            }
            match result {
                Ok(image) => {
                    log_info!("Selfie captured ({})", image.mime_type());
                    state.attach_image(image);
                }
                Err(err) => {
                    log_warn!("Selfie capture failed: {err}");
                    state.record_capture_error(err.to_string());
                }
            }
            FlowSnapshot::from_state(&state)
        };

        self.events
            .emit(FlowEvent::ClockStateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Throws away the selfie and the location gathered so far and starts
    /// over for the same employee.
    pub async fn retake_image(&self) -> Result<FlowSnapshot> {
        let context = {
            let state = self.state.lock().await;
            match state.status {
                FlowStatus::Submitting => {
                    bail!("cannot retake while the clock event is being submitted")
                }
                FlowStatus::SubmitSucceeded => bail!("this clock event was already recorded"),
                _ => {}
            }
            state
                .context
                .clone()
                .ok_or_else(|| anyhow!("no clock attempt is open"))?
        };
        log_info!("Retaking selfie for employee {}", context.employee_id);
        self.open(context).await
    }

    pub async fn override_location(&self) -> Result<FlowSnapshot> {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.grant_override()?;
            log_warn!(
                "Location override granted for attempt {:?} ({})",
                state.attempt_id,
                state
                    .validation
                    .as_ref()
                    .map(|v| v.message.as_str())
                    .unwrap_or_default()
            );
            FlowSnapshot::from_state(&state)
        };
        self.events
            .emit(FlowEvent::ClockStateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Submits the clock event. A call made while a submission is already in
    /// flight is ignored rather than sent twice.
    pub async fn submit(&self) -> Result<SubmitOutcome> {
        let (attempt_id, payload) = {
            let mut state = self.state.lock().await;
            if state.status == FlowStatus::Submitting {
                log_info!("Submit ignored; attempt {:?} is already submitting", state.attempt_id);
                return Ok(SubmitOutcome::Ignored);
            }
            let payload = state.begin_submit(Utc::now())?;
            let attempt_id = state
                .attempt_id
                .clone()
                .ok_or_else(|| anyhow!("no clock attempt is open"))?;
            (attempt_id, payload)
        };
        self.emit_state_changed().await;

        let result = self.submitter.submit_clock_event(&payload).await;
        let visible_for_ms = self.settings.clock().notification.visible_for_ms;
        let label = action_label(payload.direction);

        match result {
            Ok(receipt) => {
                let current = {
                    let mut state = self.state.lock().await;
                    if state.is_attempt(&attempt_id) {
                        state.finish_submit(Ok(()));
                        true
                    } else {
                        false
                    }
                };

                if current {
                    self.release_attempt(Some(&attempt_id)).await;
                } else {
                    log_warn!(
                        "Attempt {} closed before the server answered; the event was still recorded",
                        attempt_id
                    );
                }

                log_info!(
                    "{} recorded for employee {} (event {:?})",
                    label,
                    payload.employee_id,
                    receipt.event_id
                );

                let message = if payload.location_override {
                    format!("{label} recorded with location override.")
                } else {
                    format!("{label} recorded.")
                };
                self.events.emit(FlowEvent::Notification(Notification {
                    message,
                    is_success: true,
                    visible_for_ms,
                }));
                self.events
                    .emit(FlowEvent::EmployeeReclassified(EmployeeReclassified {
                        employee_id: payload.employee_id.clone(),
                        direction: payload.direction,
                    }));
                if current {
                    self.emit_state_changed().await;
                }

                Ok(SubmitOutcome::Submitted(receipt))
            }
            Err(err) => {
                let reason = err.to_string();
                log_error!("Failed to submit clock event: {reason}");

                let current = {
                    let mut state = self.state.lock().await;
                    if state.is_attempt(&attempt_id) {
                        state.finish_submit(Err(reason.clone()));
                        true
                    } else {
                        false
                    }
                };

                self.events.emit(FlowEvent::Notification(Notification {
                    message: format!("Failed to {}. Please try again.", label.to_lowercase()),
                    is_success: false,
                    visible_for_ms,
                }));
                if current {
                    self.emit_state_changed().await;
                }

                Ok(SubmitOutcome::Failed(reason))
            }
        }
    }

    /// Releases the location watch and the camera and returns to `Idle`.
    /// Safe to call in any state, any number of times.
    pub async fn close(&self) -> FlowSnapshot {
        self.release_attempt(None).await;

        let (snapshot, was_open) = {
            let mut state = self.state.lock().await;
            let was_open = state.status != FlowStatus::Idle;
            if let Some(attempt_id) = &state.attempt_id {
                log_info!("Closing attempt {}", attempt_id);
            }
            state.reset();
            (FlowSnapshot::from_state(&state), was_open)
        };

        if was_open {
            self.events
                .emit(FlowEvent::ClockStateChanged(snapshot.clone()));
        }
        snapshot
    }

    /// Waits until the current attempt stops acquiring location (converged,
    /// timed out, failed or cancelled) and returns the resulting snapshot.
    pub async fn location_settled(&self) -> Result<FlowSnapshot> {
        let rx = self
            .attempt
            .lock()
            .await
            .as_ref()
            .map(|resources| resources.session.subscribe());
        let Some(mut rx) = rx else {
            bail!("no clock attempt is acquiring location");
        };

        let waited = rx
            .wait_for(|accuracy| !accuracy.acquiring)
            .await
            .map(|accuracy| accuracy.clone());
        let settled = match waited {
            Ok(accuracy) => accuracy,
            Err(_) => rx.borrow().clone(),
        };

        let mut state = self.state.lock().await;
        if matches!(
            state.status,
            FlowStatus::AwaitingCapture | FlowStatus::AwaitingValidFix | FlowStatus::ReadyToSubmit
        ) {
            state.apply_accuracy(settled);
        }
        Ok(FlowSnapshot::from_state(&state))
    }

    /// Stops the live attempt's refinement and tasks and resets the camera.
    /// With `only`, nothing happens unless that attempt is the live one, so
    /// late cleanup cannot tear down an attempt opened in the meantime.
    async fn release_attempt(&self, only: Option<&str>) {
        let resources = {
            let mut attempt = self.attempt.lock().await;
            let keep = match (only, attempt.as_ref()) {
                (Some(expected), Some(live)) if live.attempt_id != expected => {
                    log_info!(
                        "Attempt {} already replaced by {}; leaving it running",
                        expected,
                        live.attempt_id
                    );
                    true
                }
                (Some(_), None) => true,
                _ => false,
            };
            if keep {
                return;
            }
            attempt.take()
        };

        if let Some(resources) = resources {
            resources.shutdown().await;
        }
        self.capture.reset().await;
    }

    fn spawn_accuracy_watcher(
        &self,
        attempt_id: String,
        mut accuracy_rx: watch::Receiver<AccuracyState>,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                let accuracy = accuracy_rx.borrow_and_update().clone();

                let (snapshot, status_changed) = {
                    let mut guard = state.lock().await;
                    if !guard.is_attempt(&attempt_id) {
                        break;
                    }
                    let before = guard.status;
                    guard.apply_accuracy(accuracy);
                    (FlowSnapshot::from_state(&guard), guard.status != before)
                };

                if status_changed {
                    log_info!(
                        "Attempt {} is now {:?}",
                        attempt_id,
                        snapshot.status()
                    );
                }

                events.emit(FlowEvent::AccuracyUpdated {
                    attempt_id: attempt_id.clone(),
                    accuracy: snapshot.state.accuracy.clone(),
                    validation: snapshot.state.validation.clone(),
                });
                if status_changed {
                    events.emit(FlowEvent::ClockStateChanged(snapshot));
                }

                if accuracy_rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_capture_start(&self, attempt_id: String) -> JoinHandle<()> {
        let capture = self.capture.clone();
        let state = self.state.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            match capture.start_capture().await {
                Ok(()) => log_info!("Camera stream obtained for attempt {}", attempt_id),
                Err(err) => {
                    log_warn!("Error obtaining camera stream: {err}");
                    let snapshot = {
                        let mut guard = state.lock().await;
                        if !guard.is_attempt(&attempt_id) {
                            return;
                        }
                        guard.record_capture_error(err.to_string());
                        FlowSnapshot::from_state(&guard)
                    };
                    events.emit(FlowEvent::ClockStateChanged(snapshot));
                }
            }
        })
    }

    async fn emit_state_changed(&self) -> FlowSnapshot {
        let snapshot = self.snapshot().await;
        self.events
            .emit(FlowEvent::ClockStateChanged(snapshot.clone()));
        snapshot
    }
}
