use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::geolocation::{AccuracyPolicy, RefinerConfig, WatchOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PositioningSettings {
    pub watch: WatchOptions,
    /// Overall bound on refinement for one attempt.
    pub max_wait_ms: u64,
    /// Defaults to the policy's soft threshold when unset.
    pub convergence_threshold_m: Option<f64>,
}

impl Default for PositioningSettings {
    fn default() -> Self {
        Self {
            watch: WatchOptions::default(),
            max_wait_ms: 30_000,
            convergence_threshold_m: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub visible_for_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            visible_for_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClockSettings {
    pub accuracy: AccuracyPolicy,
    pub positioning: PositioningSettings,
    pub notification: NotificationSettings,
}

impl ClockSettings {
    pub fn refiner_config(&self) -> RefinerConfig {
        RefinerConfig {
            convergence_threshold_m: self
                .positioning
                .convergence_threshold_m
                .unwrap_or(self.accuracy.min_threshold_m),
            max_wait: Duration::from_millis(self.positioning.max_wait_ms),
        }
    }
}

/// JSON-file-backed settings. Reads never fail; a missing or malformed file
/// falls back to defaults.
pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<ClockSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings in {}: {err}", path.display());
                ClockSettings::default()
            })
        } else {
            ClockSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Settings that live only in memory; `update` never touches disk.
    pub fn in_memory(settings: ClockSettings) -> Self {
        Self {
            path: None,
            data: RwLock::new(settings),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ClockSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClockSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn clock(&self) -> ClockSettings {
        self.read().clone()
    }

    pub fn accuracy_policy(&self) -> AccuracyPolicy {
        self.read().accuracy.clone()
    }

    pub fn update(&self, settings: ClockSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = fs::read_to_string(path)?;
        let data: ClockSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &ClockSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
