pub mod circuit_breaker;
pub mod cron_utils;
pub mod events;
pub mod logging;
pub mod models;
pub mod system;
pub mod traits;

pub use circuit_breaker::*;
pub use cron_utils::CronParser;
pub use events::*;
pub use logging::*;
pub use models::*;
pub use system::*;
pub use traits::*;

pub use scheduler_config::BackoffStrategy;
pub use scheduler_errors::{SchedulerError, SchedulerResult};
