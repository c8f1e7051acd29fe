pub mod clock_event;
pub mod employee;
pub mod fix;

pub use clock_event::{ClockDirection, ClockEventPayload, FlowContext};
pub use employee::Employee;
pub use fix::PositionFix;
