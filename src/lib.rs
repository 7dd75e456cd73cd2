pub mod app;
pub mod shutdown;

pub use app::{job_from_definition, Application};
pub use shutdown::{wait_for_shutdown_signal, ShutdownManager};
