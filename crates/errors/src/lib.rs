use thiserror::Error;


#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务配置校验失败: {0}")]
    Validation(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的时区: {0}")]
    InvalidTimezone(String),
    #[error("任务未找到: {id}")]
    JobNotFound { id: String },
    #[error("任务执行超时: {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },
    #[error("熔断器已打开，拒绝执行任务: {job_id}")]
    CircuitOpen { job_id: String },
    #[error("内存使用超过阈值: {used_bytes} > {threshold_bytes}")]
    MemoryThresholdExceeded { used_bytes: u64, threshold_bytes: u64 },
    #[error("任务执行已取消")]
    Cancelled,
    #[error("调度器正在关闭")]
    ShuttingDown,
    #[error("锁后端错误: {0}")]
    LockBackend(String),
    #[error("状态持久化错误: {0}")]
    Persistence(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }
    pub fn lock_error<S: Into<String>>(msg: S) -> Self {
        Self::LockBackend(msg.into())
    }
    pub fn persistence_error<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    /// 是否属于注册阶段的同步校验错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::Validation(_)
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidTimezone(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
