pub mod logging;

pub use logging::env_flag;
