pub mod execution;
pub mod job;
pub mod leader;
pub mod state;

pub use execution::{
    Execution, ExecutionOverrides, ExecutionResult, ExecutionStatus, MemorySnapshot,
};
pub use job::{
    handler_fn, CompleteHook, ErrorHook, FnHandler, Job, JobContext, JobHandler, JobHooks, JobId,
    JobInfo, JobOptions, Schedule, StartHook,
};
pub use leader::LeaderInfo;
pub use state::{ExecutionRef, JobMetrics, JobState, RunningExecutionRecord, StateSnapshot};
