use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::models::PositionFix;

use super::source::{PositionError, PositionReading, PositionSource, WatchHandle, WatchOptions};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyState {
    pub best_fix: Option<PositionFix>,
    pub is_converged: bool,
    pub error: Option<PositionError>,
    pub samples_seen: u32,
    /// The position watch is still live.
    pub acquiring: bool,
    /// The wait bound ran out before convergence.
    pub timed_out: bool,
}

/// What one reading did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineStep {
    Improved,
    Unchanged,
    Converged,
    Failed(PositionError),
}

impl RefineStep {
    pub fn should_stop(&self) -> bool {
        match self {
            RefineStep::Converged => true,
            RefineStep::Failed(err) => err.is_fatal(),
            RefineStep::Improved | RefineStep::Unchanged => false,
        }
    }
}

impl AccuracyState {
    pub fn acquiring() -> Self {
        Self {
            acquiring: true,
            ..Self::default()
        }
    }

    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_fix.map(|fix| fix.accuracy_meters)
    }

    /// Folds one reading in. `best_fix` only ever moves to a strictly more
    /// precise fix; convergence is reached once it drops below
    /// `convergence_threshold_m`.
    pub fn apply(&mut self, reading: PositionReading, convergence_threshold_m: f64) -> RefineStep {
        match reading {
            Ok(fix) => {
                self.samples_seen = self.samples_seen.saturating_add(1);
                if self.error == Some(PositionError::Timeout) {
                    self.error = None;
                }

                let improved = match &self.best_fix {
                    None => !fix.accuracy_meters.is_nan(),
                    Some(best) => fix.improves_on(best),
                };
                if !improved {
                    return RefineStep::Unchanged;
                }

                self.best_fix = Some(fix);
                if fix.accuracy_meters < convergence_threshold_m {
                    self.is_converged = true;
                    RefineStep::Converged
                } else {
                    RefineStep::Improved
                }
            }
            Err(err) => {
                self.error = Some(err);
                RefineStep::Failed(err)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinerConfig {
    /// Stop watching once the best fix is below this radius.
    pub convergence_threshold_m: f64,
    /// Give up on improving after this long and keep the best fix so far.
    pub max_wait: Duration,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            convergence_threshold_m: 100.0,
            max_wait: Duration::from_secs(30),
        }
    }
}

/// One refinement session: a position watch plus the task folding its
/// readings into an [`AccuracyState`].
pub struct RefinementSession {
    state_rx: watch::Receiver<AccuracyState>,
    handle: WatchHandle,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

pub struct AccuracyRefiner;

impl AccuracyRefiner {
    /// Subscribes to `source` and starts refining from an empty state.
    pub fn start(
        source: &dyn PositionSource,
        options: &WatchOptions,
        config: RefinerConfig,
    ) -> RefinementSession {
        let watch = source.watch(options);
        let (state_tx, state_rx) = watch::channel(AccuracyState::acquiring());
        let cancel_token = CancellationToken::new();

        log_info!(
            "Location tracking initiated (high_accuracy={}, timeout={}ms, converge<{}m)",
            options.high_accuracy,
            options.timeout_ms,
            config.convergence_threshold_m
        );

        let task = tokio::spawn(refine_loop(
            watch.readings,
            watch.handle.clone(),
            state_tx,
            config,
            cancel_token.clone(),
        ));

        RefinementSession {
            state_rx,
            handle: watch.handle,
            cancel_token,
            task: Some(task),
        }
    }
}

impl RefinementSession {
    pub fn state(&self) -> AccuracyState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AccuracyState> {
        self.state_rx.clone()
    }

    pub fn handle(&self) -> &WatchHandle {
        &self.handle
    }

    /// Stops refining and waits for the loop to exit. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        self.handle.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::error!("refinement task failed to join: {err}");
            }
        }
    }
}

impl Drop for RefinementSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.handle.cancel();
    }
}

async fn refine_loop(
    mut readings: mpsc::Receiver<PositionReading>,
    handle: WatchHandle,
    state_tx: watch::Sender<AccuracyState>,
    config: RefinerConfig,
    cancel_token: CancellationToken,
) {
    let deadline = tokio::time::sleep(config.max_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("Location tracking cancelled");
                break;
            }
            _ = &mut deadline => {
                state_tx.send_modify(|state| state.timed_out = true);
                let best = state_tx.borrow().best_accuracy();
                log_warn!(
                    "Location did not converge within {:?}; keeping best fix {:?}m",
                    config.max_wait,
                    best
                );
                break;
            }
            reading = readings.recv() => {
                let Some(reading) = reading else {
                    log_info!("Position source ended");
                    break;
                };

                let mut step = RefineStep::Unchanged;
                state_tx.send_modify(|state| {
                    step = state.apply(reading, config.convergence_threshold_m);
                });

                match step {
                    RefineStep::Improved => {
                        log_debug!("Best fix improved to {:?}m", state_tx.borrow().best_accuracy());
                    }
                    RefineStep::Unchanged => {}
                    RefineStep::Converged => {
                        log_info!(
                            "Desired accuracy achieved ({:?}m), stopping location tracking",
                            state_tx.borrow().best_accuracy()
                        );
                    }
                    RefineStep::Failed(err) => {
                        log_warn!("Error tracking location: {err}");
                    }
                }

                if step.should_stop() {
                    break;
                }
            }
        }
    }

    handle.cancel();
    state_tx.send_modify(|state| state.acquiring = false);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(accuracy: f64) -> PositionReading {
        Ok(PositionFix::new(51.5, -0.1, accuracy))
    }

    #[test]
    fn first_fix_becomes_best() {
        let mut state = AccuracyState::acquiring();
        assert_eq!(state.apply(fix(800.0), 100.0), RefineStep::Improved);
        assert_eq!(state.best_accuracy(), Some(800.0));
        assert!(!state.is_converged);
    }

    #[test]
    fn worse_or_equal_fixes_do_not_replace_best() {
        let mut state = AccuracyState::acquiring();
        state.apply(fix(300.0), 100.0);
        assert_eq!(state.apply(fix(450.0), 100.0), RefineStep::Unchanged);
        assert_eq!(state.apply(fix(300.0), 100.0), RefineStep::Unchanged);
        assert_eq!(state.best_accuracy(), Some(300.0));
        assert_eq!(state.samples_seen, 3);
    }

    #[test]
    fn best_accuracy_never_increases() {
        let samples = [900.0, 1200.0, 640.0, 640.0, 700.0, 220.0, 5000.0, 180.0, 181.0, 95.0];
        let mut state = AccuracyState::acquiring();
        let mut previous = f64::INFINITY;
        for accuracy in samples {
            state.apply(fix(accuracy), 50.0);
            let best = state.best_accuracy().unwrap();
            assert!(best <= previous, "{best} > {previous}");
            previous = best;
        }
        assert_eq!(previous, 95.0);
    }

    #[test]
    fn converges_below_threshold() {
        let mut state = AccuracyState::acquiring();
        state.apply(fix(250.0), 100.0);
        let step = state.apply(fix(40.0), 100.0);
        assert_eq!(step, RefineStep::Converged);
        assert!(step.should_stop());
        assert!(state.is_converged);
    }

    #[test]
    fn permission_denied_keeps_best_fix_absent() {
        let mut state = AccuracyState::acquiring();
        let step = state.apply(Err(PositionError::PermissionDenied), 100.0);
        assert!(step.should_stop());
        assert_eq!(state.error, Some(PositionError::PermissionDenied));
        assert!(state.best_fix.is_none());
    }

    #[test]
    fn timeout_is_cleared_by_next_fix() {
        let mut state = AccuracyState::acquiring();
        let step = state.apply(Err(PositionError::Timeout), 100.0);
        assert!(!step.should_stop());
        assert_eq!(state.error, Some(PositionError::Timeout));
        state.apply(fix(300.0), 100.0);
        assert!(state.error.is_none());
    }

    #[test]
    fn nan_accuracy_is_ignored() {
        let mut state = AccuracyState::acquiring();
        assert_eq!(state.apply(fix(f64::NAN), 100.0), RefineStep::Unchanged);
        assert!(state.best_fix.is_none());
    }
}
