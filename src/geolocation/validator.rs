use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PositionFix;

/// Thresholds that decide whether a fix may be used for a clock event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccuracyPolicy {
    /// Above this the fix is still usable but flagged as imprecise.
    pub min_threshold_m: f64,
    /// Above this the fix is rejected. `None` never rejects on accuracy.
    pub max_threshold_m: Option<f64>,
    /// Whether a user may push a rejected fix through anyway.
    pub override_allowed: bool,
}

impl Default for AccuracyPolicy {
    fn default() -> Self {
        Self {
            min_threshold_m: 100.0,
            max_threshold_m: Some(500.0),
            override_allowed: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ValidationTier {
    Reject,
    Warn,
    Accept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationRejected {
    #[error("no real location fix was obtained")]
    ZeroCoordinates,
    #[error("location accuracy is too low")]
    AccuracyTooLow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub tier: ValidationTier,
    pub message: String,
    pub rejection: Option<ValidationRejected>,
}

impl ValidationResult {
    fn reject(rejection: ValidationRejected, message: String) -> Self {
        Self {
            tier: ValidationTier::Reject,
            message,
            rejection: Some(rejection),
        }
    }

    /// Warn and Accept both allow the default submit path.
    pub fn is_valid(&self) -> bool {
        self.tier != ValidationTier::Reject
    }
}

/// Classifies a fix against `policy`. Pure; recomputed on every fix update.
pub fn validate_geolocation(
    latitude: f64,
    longitude: f64,
    accuracy_meters: f64,
    policy: &AccuracyPolicy,
) -> ValidationResult {
    let no_fix = !latitude.is_finite()
        || !longitude.is_finite()
        || (latitude == 0.0 && longitude == 0.0);
    if no_fix {
        return ValidationResult::reject(
            ValidationRejected::ZeroCoordinates,
            "Location not found.".to_string(),
        );
    }

    if !accuracy_meters.is_finite() {
        return ValidationResult::reject(
            ValidationRejected::AccuracyTooLow,
            "Location accuracy is unknown.".to_string(),
        );
    }

    if let Some(max) = policy.max_threshold_m {
        if accuracy_meters > max {
            return ValidationResult::reject(
                ValidationRejected::AccuracyTooLow,
                format!(
                    "Location error of {:.2} km is above the {} m limit.",
                    accuracy_meters / 1000.0,
                    max.round()
                ),
            );
        }
    }

    if accuracy_meters > policy.min_threshold_m {
        return ValidationResult {
            tier: ValidationTier::Warn,
            message: format!(
                "Location is only accurate to {} m. The clock event is still valid.",
                accuracy_meters.round()
            ),
            rejection: None,
        };
    }

    ValidationResult {
        tier: ValidationTier::Accept,
        message: format!("Location verified to within {} m.", accuracy_meters.round()),
        rejection: None,
    }
}

pub fn validate_fix(fix: &PositionFix, policy: &AccuracyPolicy) -> ValidationResult {
    validate_geolocation(fix.latitude, fix.longitude, fix.accuracy_meters, policy)
}
