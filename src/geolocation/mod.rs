pub mod refiner;
pub mod scripted;
pub mod simulated;
pub mod source;
pub mod validator;

pub use refiner::{AccuracyRefiner, AccuracyState, RefineStep, RefinementSession, RefinerConfig};
pub use scripted::{ScriptStep, ScriptedPositionSource};
pub use simulated::SimulatedPositionSource;
pub use source::{
    PositionError, PositionReading, PositionSource, PositionWatch, UnsupportedPositionSource,
    WatchHandle, WatchOptions,
};
pub use validator::{
    validate_fix, validate_geolocation, AccuracyPolicy, ValidationRejected, ValidationResult,
    ValidationTier,
};
