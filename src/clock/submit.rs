use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ClockEventPayload;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected the clock event ({status}): {message}")]
    Server { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub event_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// The remote `insert-clock-event` call. One invocation per confirmation; no
/// retries happen here.
#[async_trait]
pub trait ClockEventSubmitter: Send + Sync {
    async fn submit_clock_event(
        &self,
        payload: &ClockEventPayload,
    ) -> Result<SubmitReceipt, SubmitError>;
}

/// Accepts every event and logs it, minus the image body. Used by the driver
/// binary when no API is wired in.
pub struct LoggingSubmitter;

#[async_trait]
impl ClockEventSubmitter for LoggingSubmitter {
    async fn submit_clock_event(
        &self,
        payload: &ClockEventPayload,
    ) -> Result<SubmitReceipt, SubmitError> {
        let event_id = Uuid::new_v4().to_string();
        info!(
            "clock event {} employee={} site={} direction={} at=({:.6}, {:.6}) ±{}m override={} image={} ({} b64 chars)",
            event_id,
            payload.employee_id,
            payload.site_id,
            payload.direction.as_str(),
            payload.latitude,
            payload.longitude,
            payload.accuracy_meters.round(),
            payload.location_override,
            payload.image_format,
            payload.image_data.len()
        );
        Ok(SubmitReceipt {
            event_id: Some(event_id),
            received_at: Utc::now(),
        })
    }
}
