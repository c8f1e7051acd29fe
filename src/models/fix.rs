use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of position plus its uncertainty radius.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in metres; smaller is better.
    pub accuracy_meters: f64,
    pub captured_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            captured_at: Utc::now(),
        }
    }

    pub fn at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Strictly more precise than `other`. NaN accuracy never improves anything.
    pub fn improves_on(&self, other: &PositionFix) -> bool {
        self.accuracy_meters < other.accuracy_meters
    }
}
