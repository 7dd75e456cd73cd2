//! 调度器与外部存储之间的抽象接口
//!
//! - [`LockBackend`] 领导者锁的存储（文件、Redis、内存）
//! - [`StateStore`] 状态快照的持久化
//!
//! 具体实现位于 `scheduler-infrastructure` 与 `scheduler-testing-utils`。

pub mod lock_backend;
pub mod state_store;

pub use lock_backend::*;
pub use state_store::*;
