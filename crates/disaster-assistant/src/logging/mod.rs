//! Turn activity log with an async queue in front of the sinks

mod logger;
pub mod types;

pub use logger::{ActivityLogger, LoggerConfig};
pub use types::{ActivityLog, ActivityStatus, ActivityType};
