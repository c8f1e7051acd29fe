use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    capture::CapturedImage,
    geolocation::{validate_fix, AccuracyPolicy, AccuracyState, ValidationResult, ValidationTier},
    models::{ClockEventPayload, FlowContext},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FlowStatus {
    Idle,
    AwaitingCapture,
    AwaitingValidFix,
    ReadyToSubmit,
    Submitting,
    SubmitSucceeded,
    SubmitFailed,
}

impl Default for FlowStatus {
    fn default() -> Self {
        FlowStatus::Idle
    }
}

/// Everything one clock attempt knows. Mutated only by the controller while
/// it holds the state lock.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub status: FlowStatus,
    pub attempt_id: Option<String>,
    pub context: Option<FlowContext>,
    pub opened_at: Option<DateTime<Utc>>,
    pub accuracy: AccuracyState,
    pub validation: Option<ValidationResult>,
    pub location_override: bool,
    pub capture_error: Option<String>,
    pub submit_error: Option<String>,
    #[serde(skip)]
    pub image: Option<CapturedImage>,
    #[serde(skip)]
    pub policy: AccuracyPolicy,
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_attempt(
        &mut self,
        attempt_id: String,
        context: FlowContext,
        policy: AccuracyPolicy,
        opened_at: DateTime<Utc>,
    ) {
        *self = Self {
            status: FlowStatus::AwaitingCapture,
            attempt_id: Some(attempt_id),
            context: Some(context),
            opened_at: Some(opened_at),
            accuracy: AccuracyState::acquiring(),
            policy,
            ..Self::default()
        };
    }

    pub fn is_attempt(&self, attempt_id: &str) -> bool {
        self.attempt_id.as_deref() == Some(attempt_id)
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// An acceptable fix, or a rejected one the user chose to push through.
    pub fn fix_ready(&self) -> bool {
        match &self.validation {
            Some(validation) if validation.is_valid() => true,
            Some(_) => self.location_override && self.accuracy.best_fix.is_some(),
            None => false,
        }
    }

    pub fn can_submit(&self) -> bool {
        matches!(
            self.status,
            FlowStatus::ReadyToSubmit | FlowStatus::SubmitFailed
        ) && self.has_image()
            && self.fix_ready()
    }

    pub fn can_override(&self) -> bool {
        self.policy.override_allowed
            && !self.location_override
            && self.accuracy.best_fix.is_some()
            && matches!(
                self.validation.as_ref().map(|v| v.tier),
                Some(ValidationTier::Reject)
            )
    }

    fn advance(&mut self) {
        if self.status == FlowStatus::AwaitingValidFix && self.has_image() && self.fix_ready() {
            self.status = FlowStatus::ReadyToSubmit;
        }
    }

    /// Takes the refiner's latest state and reclassifies the best fix.
    pub fn apply_accuracy(&mut self, accuracy: AccuracyState) {
        self.validation = accuracy
            .best_fix
            .as_ref()
            .map(|fix| validate_fix(fix, &self.policy));
        self.accuracy = accuracy;
        self.advance();
    }

    pub fn attach_image(&mut self, image: CapturedImage) {
        self.image = Some(image);
        self.capture_error = None;
        if self.status == FlowStatus::AwaitingCapture {
            self.status = FlowStatus::AwaitingValidFix;
        }
        self.advance();
    }

    pub fn record_capture_error(&mut self, message: String) {
        self.capture_error = Some(message);
    }

    pub fn grant_override(&mut self) -> Result<()> {
        if self.attempt_id.is_none() {
            bail!("no clock attempt is open");
        }
        if !self.policy.override_allowed {
            bail!("location override is disabled");
        }
        if self.accuracy.best_fix.is_none() {
            bail!("no location fix to override yet");
        }
        match self.validation.as_ref().map(|v| v.tier) {
            Some(ValidationTier::Reject) => {}
            _ => bail!("location does not need an override"),
        }
        self.location_override = true;
        self.advance();
        Ok(())
    }

    /// Moves to `Submitting` and freezes the payload for this confirmation.
    pub fn begin_submit(&mut self, occurred_at: DateTime<Utc>) -> Result<ClockEventPayload> {
        match self.status {
            FlowStatus::ReadyToSubmit | FlowStatus::SubmitFailed => {}
            FlowStatus::Idle => bail!("no clock attempt is open"),
            FlowStatus::Submitting => bail!("a clock event is already being submitted"),
            FlowStatus::SubmitSucceeded => bail!("this clock event was already recorded"),
            FlowStatus::AwaitingCapture | FlowStatus::AwaitingValidFix => {
                if !self.has_image() {
                    bail!("capture a selfie before confirming");
                }
                return Err(self.location_blocker());
            }
        }

        if !self.fix_ready() {
            return Err(self.location_blocker());
        }

        let context = self
            .context
            .as_ref()
            .ok_or_else(|| anyhow!("missing clock context"))?;
        let fix = self
            .accuracy
            .best_fix
            .as_ref()
            .ok_or_else(|| anyhow!("missing location fix"))?;
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("missing selfie"))?;

        let payload =
            ClockEventPayload::build(context, fix, image, self.location_override, occurred_at);
        self.status = FlowStatus::Submitting;
        self.submit_error = None;
        Ok(payload)
    }

    fn location_blocker(&self) -> anyhow::Error {
        match &self.validation {
            Some(validation) if !validation.is_valid() => {
                if self.can_override() {
                    anyhow!("{} Override to clock anyway.", validation.message)
                } else {
                    anyhow!("{}", validation.message)
                }
            }
            Some(_) => anyhow!("location is not ready yet"),
            None => match self.accuracy.error {
                Some(err) => anyhow!("{err}"),
                None => anyhow!("still waiting for a location fix"),
            },
        }
    }

    pub fn finish_submit(&mut self, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => {
                self.status = FlowStatus::SubmitSucceeded;
                self.submit_error = None;
                self.accuracy.acquiring = false;
            }
            Err(message) => {
                self.status = FlowStatus::SubmitFailed;
                self.submit_error = Some(message);
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
