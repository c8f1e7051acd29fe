use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;

use crate::models::PositionFix;

use super::source::{
    PositionError, PositionReading, PositionSource, PositionWatch, WatchHandle, WatchOptions,
    READING_BUFFER,
};

#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub delay: Duration,
    pub reading: PositionReading,
}

/// Replays a fixed sequence of readings on every `watch`. Used for
/// deterministic tests and demos.
///
/// A step whose delay exceeds the watch timeout first reports
/// `PositionError::Timeout` and then delivers its reading late, the way a
/// browser watch keeps going after a timeout.
#[derive(Clone)]
pub struct ScriptedPositionSource {
    steps: Arc<Vec<ScriptStep>>,
    hold_open: bool,
    watches: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedPositionSource {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Arc::new(steps),
            hold_open: true,
            watches: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fixes `(lat, lon, accuracy)` spaced `every` apart.
    pub fn from_fixes(every: Duration, fixes: &[(f64, f64, f64)]) -> Self {
        Self::new(
            fixes
                .iter()
                .map(|&(lat, lon, accuracy)| ScriptStep {
                    delay: every,
                    reading: Ok(PositionFix::new(lat, lon, accuracy)),
                })
                .collect(),
        )
    }

    pub fn failing(err: PositionError) -> Self {
        Self::new(vec![ScriptStep {
            delay: Duration::ZERO,
            reading: Err(err),
        }])
    }

    /// Close the stream once the script runs out instead of going quiet.
    pub fn ending(mut self) -> Self {
        self.hold_open = false;
        self
    }

    pub fn watches(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl PositionSource for ScriptedPositionSource {
    fn watch(&self, options: &WatchOptions) -> PositionWatch {
        self.watches.fetch_add(1, Ordering::SeqCst);

        let releases = self.releases.clone();
        let handle = WatchHandle::new(move || {
            releases.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = mpsc::channel(READING_BUFFER);
        let token = handle.token();
        let steps = self.steps.clone();
        let hold_open = self.hold_open;
        let timeout = options.timeout();

        tokio::spawn(async move {
            for step in steps.iter() {
                let mut remaining = step.delay;
                if !timeout.is_zero() && remaining > timeout {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(timeout) => {}
                    }
                    if tx.send(Err(PositionError::Timeout)).await.is_err() {
                        return;
                    }
                    remaining -= timeout;
                }

                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(remaining) => {}
                }

                let reading = step.reading.clone().map(|fix| PositionFix {
                    captured_at: chrono::Utc::now(),
                    ..fix
                });
                if tx.send(reading).await.is_err() {
                    return;
                }
            }

            if hold_open {
                token.cancelled().await;
            }
        });

        PositionWatch {
            readings: rx,
            handle,
        }
    }
}
