pub mod log_level;
pub mod structured_logger;

pub use log_level::LogLevel;
pub use structured_logger::{LogEntry, MemoryLogger, SchedulerLogger, TracingLogger};
