use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use scheduler_core::ExecutionStatus;

pub const JOB_ATTEMPTS_TOTAL: &str = "scheduler_job_attempts_total";
pub const JOB_EXECUTIONS_TOTAL: &str = "scheduler_job_executions_total";
pub const JOB_DURATION_SECONDS: &str = "scheduler_job_duration_seconds";
pub const ACTIVE_EXECUTIONS: &str = "scheduler_active_executions";

pub fn record_attempt(job_id: &str) {
    counter!(JOB_ATTEMPTS_TOTAL, "job_id" => job_id.to_string()).increment(1);
}

pub fn record_execution(job_id: &str, status: ExecutionStatus, duration: Duration) {
    counter!(
        JOB_EXECUTIONS_TOTAL,
        "job_id" => job_id.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
    histogram!(JOB_DURATION_SECONDS, "job_id" => job_id.to_string())
        .record(duration.as_secs_f64());
}

pub fn set_active_executions(count: usize) {
    gauge!(ACTIVE_EXECUTIONS).set(count as f64);
}
