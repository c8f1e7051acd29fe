use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::CapturedImage;

use super::PositionFix;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ClockDirection {
    In,
    Out,
}

impl ClockDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockDirection::In => "clockIn",
            ClockDirection::Out => "clockOut",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            ClockDirection::In => ClockDirection::Out,
            ClockDirection::Out => ClockDirection::In,
        }
    }
}

impl std::str::FromStr for ClockDirection {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "in" | "clockin" => Ok(ClockDirection::In),
            "out" | "clockout" => Ok(ClockDirection::Out),
            other => Err(anyhow::anyhow!("unknown clock direction '{other}'")),
        }
    }
}

/// The selection a host hands over when the clock modal opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlowContext {
    pub employee_id: String,
    pub site_id: String,
    pub direction: ClockDirection,
}

impl FlowContext {
    pub fn new(
        employee_id: impl Into<String>,
        site_id: impl Into<String>,
        direction: ClockDirection,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            site_id: site_id.into(),
            direction,
        }
    }
}

/// Wire body for `insert-clock-event`. Built once per confirmation and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockEventPayload {
    pub employee_id: String,
    pub site_id: String,
    pub direction: ClockDirection,
    pub occurred_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    /// Base64, no data-URL prefix.
    pub image_data: String,
    /// MIME type, e.g. `image/png`.
    pub image_format: String,
    pub location_override: bool,
}

impl ClockEventPayload {
    pub fn build(
        context: &FlowContext,
        fix: &PositionFix,
        image: &CapturedImage,
        location_override: bool,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            employee_id: context.employee_id.clone(),
            site_id: context.site_id.clone(),
            direction: context.direction,
            occurred_at,
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_meters: fix.accuracy_meters,
            image_data: STANDARD.encode(&image.data),
            image_format: image.mime_type().to_string(),
            location_override,
        }
    }

    pub fn decoded_image(&self) -> anyhow::Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.image_data)?)
    }
}
