//! # Scheduler Testing Utils
//!
//! 各 crate 测试共用的工具：
//!
//! - **内存后端**: [`InMemoryLockBackend`]、[`InMemoryStateStore`]，可注入故障
//! - **处理函数**: 计数、失败、慢速、并发探测等 [`JobHandler`](scheduler_core::JobHandler) 实现
//! - **配置构造**: 适合测试的短超时配置
//! - **辅助函数**: 轮询等待条件成立
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod handlers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use handlers::*;
pub use helpers::*;
pub use mocks::*;
