use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    clock::FlowSnapshot,
    geolocation::{AccuracyState, ValidationResult},
    models::ClockDirection,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub message: String,
    pub is_success: bool,
    pub visible_for_ms: u64,
}

/// Tells the list view to move an employee between the clock-in and
/// clock-out lists.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeReclassified {
    pub employee_id: String,
    pub direction: ClockDirection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum FlowEvent {
    ClockStateChanged(FlowSnapshot),
    AccuracyUpdated {
        attempt_id: String,
        accuracy: AccuracyState,
        validation: Option<ValidationResult>,
    },
    Notification(Notification),
    EmployeeReclassified(EmployeeReclassified),
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::ClockStateChanged(_) => "clock-state-changed",
            FlowEvent::AccuracyUpdated { .. } => "accuracy-updated",
            FlowEvent::Notification(_) => "notification",
            FlowEvent::EmployeeReclassified(_) => "employee-reclassified",
        }
    }
}

/// Fan-out of flow events to whatever the host has listening.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Nobody listening is fine; events are not queued for late subscribers.
    pub fn emit(&self, event: FlowEvent) {
        log::debug!("emit {}", event.name());
        let _ = self.tx.send(event);
    }
}
