use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::execution::{Execution, ExecutionStatus};
use crate::models::job::JobId;

/// 滚动平均耗时的平滑系数
pub const DURATION_SMOOTHING: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRef {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl From<&Execution> for ExecutionRef {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.execution_id.clone(),
            status: execution.status,
            started_at: execution.start_time,
            ended_at: execution.end_time,
            duration_ms: execution.duration_ms,
        }
    }
}

/// 单个任务的聚合状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub name: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub average_duration_ms: f64,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_execution: Option<ExecutionRef>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(job_id: impl Into<JobId>, name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            average_duration_ms: 0.0,
            enabled: true,
            next_run: None,
            last_execution: None,
            updated_at: Utc::now(),
        }
    }

    /// 执行结束时更新计数；只有 completed 会更新平均耗时
    pub fn record_terminal(&mut self, execution: &Execution) {
        match execution.status {
            ExecutionStatus::Completed => {
                self.success_count += 1;
                self.consecutive_failures = 0;
                let sample = execution.duration_ms.unwrap_or_default() as f64;
                if self.success_count == 1 {
                    self.average_duration_ms = sample;
                } else {
                    self.average_duration_ms = DURATION_SMOOTHING * sample
                        + (1.0 - DURATION_SMOOTHING) * self.average_duration_ms;
                }
            }
            ExecutionStatus::Failed | ExecutionStatus::Timeout => {
                self.failure_count += 1;
                self.consecutive_failures += 1;
            }
            ExecutionStatus::Cancelled | ExecutionStatus::Running => {}
        }
        self.last_execution = Some(ExecutionRef::from(execution));
        self.updated_at = Utc::now();
    }

    pub fn metrics(&self) -> JobMetrics {
        let (success_rate, failure_rate) = if self.execution_count == 0 {
            (0.0, 0.0)
        } else {
            let total = self.execution_count as f64;
            (
                self.success_count as f64 / total,
                self.failure_count as f64 / total,
            )
        };
        JobMetrics {
            job_id: self.job_id.clone(),
            success_rate,
            failure_rate,
            average_duration_ms: self.average_duration_ms,
            total_executions: self.execution_count,
            recent_failures: self.consecutive_failures,
        }
    }
}

/// 由聚合状态推导出的指标，比率取值 0.0 ~ 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub job_id: JobId,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub average_duration_ms: f64,
    pub total_executions: u64,
    pub recent_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningExecutionRecord {
    pub execution_id: String,
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
}

/// 持久化到磁盘的状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub pid: u32,
    pub jobs: HashMap<JobId, JobState>,
    pub running_executions: Vec<RunningExecutionRecord>,
}

impl StateSnapshot {
    pub const CURRENT_VERSION: u32 = 1;
}
