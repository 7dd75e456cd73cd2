//! 任务调度核心
//!
//! [`JobScheduler`] 负责注册、定时与并发控制，执行委托给
//! `scheduler-executor`，状态与选主分别由 [`JobStateManager`] 和
//! [`LeaderElection`] 维护。

pub mod builders;
pub mod leader_election;
pub mod queue;
pub mod scheduler;
pub mod state_manager;

pub use builders::JobBuilder;
pub use leader_election::{LeaderElection, REPLICA_INDEX_ENV};
pub use queue::{PendingEntry, PendingQueue};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use state_manager::JobStateManager;
