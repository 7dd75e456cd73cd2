pub mod backoff;
pub mod executor;
pub mod handlers;
pub mod metrics;

pub use backoff::BackoffPolicy;
pub use executor::JobExecutor;
pub use handlers::{ShellCommand, ShellHandler};
