pub mod commands;
pub mod controller;
pub mod state;
pub mod submit;

pub use controller::{ClockFlowController, FlowSnapshot, SubmitOutcome};
pub use state::{FlowState, FlowStatus};
pub use submit::{ClockEventSubmitter, LoggingSubmitter, SubmitError, SubmitReceipt};
