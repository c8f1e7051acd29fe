use std::time::Duration;

use rand::Rng;
use tokio::{
    sync::mpsc,
    time::{Interval, MissedTickBehavior},
};

use crate::models::PositionFix;

use super::source::{
    PositionError, PositionSource, PositionWatch, WatchHandle, WatchOptions, READING_BUFFER,
};

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// A GNSS-like source for the driver binary: starts coarse (cell/wifi
/// estimate) and tightens toward `floor_accuracy_m`, with scatter in both
/// position and reported accuracy.
///
/// Each watch honours `timeout_ms`: when `interval` is longer, a
/// `PositionError::Timeout` is reported for every elapsed budget before the
/// next fix. `maximum_age_ms` has no effect since every fix is fresh.
#[derive(Debug, Clone)]
pub struct SimulatedPositionSource {
    pub latitude: f64,
    pub longitude: f64,
    pub initial_accuracy_m: f64,
    pub floor_accuracy_m: f64,
    /// Fraction of the remaining error kept after each reading.
    pub decay: f64,
    pub interval: Duration,
}

impl SimulatedPositionSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            initial_accuracy_m: 1_500.0,
            floor_accuracy_m: 12.0,
            decay: 0.55,
            interval: Duration::from_millis(800),
        }
    }

    fn jittered_fix(&self, rng: &mut impl Rng, accuracy: f64) -> PositionFix {
        let reported = (accuracy * rng.gen_range(0.85..1.25)).max(self.floor_accuracy_m);
        let offset_m = reported * rng.gen_range(0.0..0.6);
        let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
        let d_lat = offset_m * bearing.cos() / METERS_PER_DEGREE_LAT;
        let d_lon = offset_m * bearing.sin()
            / (METERS_PER_DEGREE_LAT * self.latitude.to_radians().cos().max(0.01));
        PositionFix::new(self.latitude + d_lat, self.longitude + d_lon, reported)
    }
}

impl PositionSource for SimulatedPositionSource {
    fn watch(&self, options: &WatchOptions) -> PositionWatch {
        let handle = WatchHandle::new(|| log::info!("Simulated location tracking stopped"));
        let (tx, rx) = mpsc::channel(READING_BUFFER);
        let token = handle.token();
        let source = self.clone();
        // Low-accuracy mode never gets past the coarse estimate.
        let floor = if options.high_accuracy {
            source.floor_accuracy_m
        } else {
            source.initial_accuracy_m / 3.0
        };

        let budget = Some(options.timeout()).filter(|timeout| !timeout.is_zero());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(source.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut accuracy = source.initial_accuracy_m;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    ticked = next_tick(&mut ticker, budget) => {
                        let reading = if ticked {
                            let mut rng = rand::thread_rng();
                            Ok(source.jittered_fix(&mut rng, accuracy))
                        } else {
                            Err(PositionError::Timeout)
                        };
                        let got_fix = reading.is_ok();
                        if tx.send(reading).await.is_err() {
                            break;
                        }
                        if got_fix {
                            accuracy = (accuracy * source.decay).max(floor);
                        }
                    }
                }
            }
        });

        PositionWatch {
            readings: rx,
            handle,
        }
    }
}

/// False when the reading budget ran out before the next tick.
async fn next_tick(ticker: &mut Interval, budget: Option<Duration>) -> bool {
    match budget {
        Some(budget) => tokio::time::timeout(budget, ticker.tick()).await.is_ok(),
        None => {
            ticker.tick().await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accuracy_tightens_toward_floor() {
        let source = SimulatedPositionSource {
            interval: Duration::from_millis(10),
            ..SimulatedPositionSource::new(51.5, -0.1)
        };
        let mut watch = source.watch(&WatchOptions::default());

        let mut last = f64::INFINITY;
        for _ in 0..20 {
            last = watch.readings.recv().await.unwrap().unwrap().accuracy_meters;
        }
        assert!(last < 20.0, "accuracy stuck at {last}");
        assert!(last >= source.floor_accuracy_m);

        watch.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_receiver_reports_timeouts_between_fixes() {
        let source = SimulatedPositionSource {
            interval: Duration::from_millis(2_500),
            ..SimulatedPositionSource::new(51.5, -0.1)
        };
        let options = WatchOptions {
            timeout_ms: 1_000,
            ..WatchOptions::default()
        };
        let mut watch = source.watch(&options);

        assert!(watch.readings.recv().await.unwrap().is_ok());
        assert_eq!(watch.readings.recv().await, Some(Err(PositionError::Timeout)));
        assert_eq!(watch.readings.recv().await, Some(Err(PositionError::Timeout)));
        assert!(watch.readings.recv().await.unwrap().is_ok());

        watch.handle.cancel();
    }
}
