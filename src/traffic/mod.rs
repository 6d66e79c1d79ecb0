pub mod config;
pub mod driver;
pub mod logging;
pub mod patterns;

pub use config::{TrafficConfig, TrafficPatternSpec};
pub use driver::CoreTrafficDriver;
pub use patterns::{PatternEngine, PatternOp, ThreadOp};
