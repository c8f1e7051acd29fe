pub mod capture;
pub mod clock;
pub mod events;
pub mod geolocation;
pub mod models;
pub mod roster;
pub mod settings;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use tokio::{sync::RwLock, task::JoinHandle};

use capture::{FileCapture, ImageCapture};
use clock::{commands, ClockEventSubmitter, ClockFlowController, LoggingSubmitter};
use events::{EventBus, FlowEvent};
use geolocation::{PositionSource, SimulatedPositionSource};
use models::{ClockDirection, Employee};
use roster::ClockLists;
use settings::SettingsStore;

pub use utils::env_flag;

pub struct AppState {
    pub(crate) clock: ClockFlowController,
    pub(crate) roster: Arc<RwLock<ClockLists>>,
    pub(crate) settings: Arc<SettingsStore>,
}

impl AppState {
    pub fn new(
        settings: Arc<SettingsStore>,
        positions: Arc<dyn PositionSource>,
        capture: Arc<dyn ImageCapture>,
        submitter: Arc<dyn ClockEventSubmitter>,
        roster: ClockLists,
    ) -> Self {
        let clock = ClockFlowController::new(
            positions,
            capture,
            submitter,
            settings.clone(),
            EventBus::new(),
        );
        Self {
            clock,
            roster: Arc::new(RwLock::new(roster)),
            settings,
        }
    }

    pub fn clock(&self) -> &ClockFlowController {
        &self.clock
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Keeps the clock lists in step with successful clock events.
    pub fn spawn_roster_sync(&self) -> JoinHandle<()> {
        let mut rx = self.clock.events().subscribe();
        let roster = self.roster.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(FlowEvent::EmployeeReclassified(event)) => {
                        if roster.write().await.apply_reclassification(&event) {
                            log::info!(
                                "Moved employee {} off the {} list",
                                event.employee_id,
                                event.direction.as_str()
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Roster sync skipped {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

const USAGE: &str = "usage: clockpoint <employee-id> <site-id> <in|out> <selfie-image> [--at LAT,LON] [--override]";

#[derive(Debug, Clone, PartialEq)]
struct DriverArgs {
    employee_id: String,
    site_id: String,
    direction: ClockDirection,
    selfie: PathBuf,
    at: (f64, f64),
    allow_override: bool,
}

impl DriverArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut positional = Vec::new();
        let mut at = (51.5074, -0.1278);
        let mut allow_override = false;

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--override" => allow_override = true,
                "--at" => {
                    let value = iter.next().ok_or_else(|| anyhow!("--at needs LAT,LON"))?;
                    let (lat, lon) = value
                        .split_once(',')
                        .ok_or_else(|| anyhow!("--at needs LAT,LON"))?;
                    at = (
                        lat.trim().parse().context("bad latitude")?,
                        lon.trim().parse().context("bad longitude")?,
                    );
                }
                _ => positional.push(arg),
            }
        }

        let [employee_id, site_id, direction, selfie]: [String; 4] = positional
            .try_into()
            .map_err(|_| anyhow!("{USAGE}"))?;

        Ok(Self {
            employee_id,
            site_id,
            direction: direction.parse()?,
            selfie: PathBuf::from(selfie),
            at,
            allow_override,
        })
    }
}

/// Runs one clock attempt from the command line against a simulated GNSS
/// receiver, a still-image camera and a logging submitter.
pub fn run() -> Result<()> {
    let verbose = env_flag("CLOCKPOINT_DEBUG");
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    log::info!("clockpoint starting up...");

    let args = DriverArgs::parse(std::env::args().skip(1))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(drive(args))
}

async fn drive(args: DriverArgs) -> Result<()> {
    let settings_path = std::env::var("CLOCKPOINT_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("clockpoint.json"));
    let settings = Arc::new(SettingsStore::new(settings_path)?);

    let employee = Employee::new(args.employee_id.clone(), args.employee_id.clone());
    let roster = match args.direction {
        ClockDirection::In => ClockLists::new(vec![employee], Vec::new()),
        ClockDirection::Out => ClockLists::new(Vec::new(), vec![employee]),
    };

    let app = AppState::new(
        settings,
        Arc::new(SimulatedPositionSource::new(args.at.0, args.at.1)),
        Arc::new(FileCapture::new(&args.selfie)),
        Arc::new(LoggingSubmitter),
        roster,
    );
    let roster_sync = app.spawn_roster_sync();

    let mut events = app.clock().events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                FlowEvent::AccuracyUpdated {
                    validation: Some(validation),
                    ..
                } => log::info!("location {:?}: {}", validation.tier, validation.message),
                FlowEvent::Notification(notification) => log::info!(
                    "[{}] {}",
                    if notification.is_success { "success" } else { "failure" },
                    notification.message
                ),
                _ => {}
            }
        }
    });

    let result = clock_once(&app, &args).await;
    if result.is_err() {
        commands::close_clock(&app).await.map_err(anyhow::Error::msg)?;
    }

    // Let the roster sync catch the reclassification before reporting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let lists = commands::get_clock_lists(&app)
        .await
        .map_err(anyhow::Error::msg)?;
    log::info!("clock lists now: {}", serde_json::to_string(&lists)?);

    roster_sync.abort();
    printer.abort();
    result
}

async fn clock_once(app: &AppState, args: &DriverArgs) -> Result<()> {
    commands::open_clock(
        app,
        args.employee_id.clone(),
        args.site_id.clone(),
        args.direction,
    )
    .await
    .map_err(anyhow::Error::msg)?;

    let snapshot = commands::capture_selfie(app)
        .await
        .map_err(anyhow::Error::msg)?;
    if let Some(err) = snapshot.state.capture_error {
        bail!("{err}");
    }

    let snapshot = app.clock().location_settled().await?;
    if !snapshot.can_submit {
        if snapshot.can_override && args.allow_override {
            commands::override_location(app)
                .await
                .map_err(anyhow::Error::msg)?;
        } else {
            let reason = snapshot
                .state
                .validation
                .map(|v| v.message)
                .or_else(|| snapshot.state.accuracy.error.map(|e| e.to_string()))
                .unwrap_or_else(|| "no location fix".to_string());
            bail!("cannot clock {}: {reason}", args.direction.as_str());
        }
    }

    commands::confirm_clock(app)
        .await
        .map_err(anyhow::Error::msg)?;
    commands::close_clock(app)
        .await
        .map_err(anyhow::Error::msg)?;
    Ok(())
}
