pub mod lock;
pub mod observability;
pub mod state_store;

pub use lock::{create_lock_backend, FileLockBackend, RedisLockBackend};
pub use observability::{init_logging, init_metrics};
pub use state_store::JsonFileStateStore;
