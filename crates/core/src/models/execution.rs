use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::job::JobId;
use crate::BackoffStrategy;

/// 单次执行的状态；running 之后只会进入一个终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    /// failed 与 timeout 计入失败次数
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// 结束时的常驻内存
    pub rss_bytes: u64,
    /// 相对开始时的变化量，可能为负
    pub delta_bytes: i64,
}

/// 执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub job_id: JobId,
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: ExecutionStatus,
    pub retry_count: u32,
    #[serde(skip)]
    pub start_memory: Option<u64>,
    pub memory: Option<MemorySnapshot>,
    pub error: Option<String>,
}

impl Execution {
    pub fn start(job_id: impl Into<JobId>, execution_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            execution_id: execution_id.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            retry_count: 0,
            start_memory: None,
            memory: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }
}

/// 单个任务对执行器默认配置的覆盖项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOverrides {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub backoff: Option<BackoffStrategy>,
    pub backoff_multiplier: Option<f64>,
    pub max_retry_delay: Option<Duration>,
    pub circuit_breaker: Option<bool>,
}

/// `JobExecutor::execute` 的返回值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub memory_used: i64,
    pub circuit_breaker_tripped: bool,
    /// 仅描述最后一次尝试
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn status(&self) -> ExecutionStatus {
        if self.success {
            ExecutionStatus::Completed
        } else if self.cancelled {
            ExecutionStatus::Cancelled
        } else if self.timed_out {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Failed
        }
    }
}
