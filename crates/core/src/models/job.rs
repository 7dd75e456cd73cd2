use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cron_utils::{parse_timezone, CronParser};
use crate::models::execution::{ExecutionOverrides, ExecutionResult};
use crate::{BackoffStrategy, SchedulerError, SchedulerResult};

pub type JobId = String;

/// 任务调度方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Cron { expression: String },
    Interval { every: Duration },
    OneTime { at: DateTime<Utc> },
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    pub fn every(every: Duration) -> Self {
        Self::Interval { every }
    }

    pub fn at(at: DateTime<Utc>) -> Self {
        Self::OneTime { at }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Cron { .. } => "cron",
            Schedule::Interval { .. } => "interval",
            Schedule::OneTime { .. } => "one_time",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::OneTime { .. })
    }

    /// 注册时的同步校验：CRON语法、时区、间隔大于0、一次性任务时间在未来
    pub fn validate(&self, timezone: Option<&str>, now: DateTime<Utc>) -> SchedulerResult<()> {
        match self {
            Schedule::Cron { expression } => {
                CronParser::new(expression, timezone)?;
            }
            Schedule::Interval { every } => {
                parse_timezone(timezone)?;
                if every.is_zero() {
                    return Err(SchedulerError::validation_error("执行间隔必须大于0"));
                }
                interval_after(now, *every)?;
            }
            Schedule::OneTime { at } => {
                parse_timezone(timezone)?;
                if *at <= now {
                    return Err(SchedulerError::validation_error(format!(
                        "一次性任务的执行时间必须在未来: {}",
                        at.to_rfc3339()
                    )));
                }
            }
        }
        Ok(())
    }

    /// 计算严格晚于 `after` 的下一次执行时间；一次性任务过期后返回 None
    pub fn next_run(
        &self,
        after: DateTime<Utc>,
        timezone: Option<&str>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        match self {
            Schedule::Cron { expression } => {
                Ok(CronParser::new(expression, timezone)?.next_execution_time(after))
            }
            Schedule::Interval { every } => interval_after(after, *every).map(Some),
            Schedule::OneTime { at } => Ok((*at > after).then_some(*at)),
        }
    }
}

/// `after + every`，超出 chrono 可表示范围时返回校验错误
fn interval_after(after: DateTime<Utc>, every: Duration) -> SchedulerResult<DateTime<Utc>> {
    chrono::Duration::from_std(every)
        .ok()
        .and_then(|delta| after.checked_add_signed(delta))
        .ok_or_else(|| {
            SchedulerError::validation_error(format!("执行间隔超出范围: {}s", every.as_secs()))
        })
}

/// 传给任务处理函数的执行上下文
#[derive(Debug, Clone, Serialize)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_name: String,
    pub execution_id: String,
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

/// Job handler contract. Failure is signalled by returning `Err`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, context: JobContext) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, context: JobContext) -> anyhow::Result<Value> {
        (self.0)(context).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

pub type StartHook = Arc<dyn Fn(&JobContext) + Send + Sync>;
pub type CompleteHook = Arc<dyn Fn(&JobContext, &ExecutionResult) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&JobContext, &ExecutionResult) + Send + Sync>;

/// 任务生命周期钩子
#[derive(Clone, Default)]
pub struct JobHooks {
    pub on_start: Option<StartHook>,
    pub on_complete: Option<CompleteHook>,
    pub on_error: Option<ErrorHook>,
}

impl fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// 任务选项；重试/超时相关字段为空时使用执行器默认配置
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// 未指定时使用任务名称，重启后据此恢复持久化的状态
    pub id: Option<JobId>,
    pub enabled: bool,
    /// 数值越大越先出队
    pub priority: i32,
    pub timezone: Option<String>,
    pub max_concurrent: usize,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub backoff: Option<BackoffStrategy>,
    pub backoff_multiplier: Option<f64>,
    pub max_retry_delay: Option<Duration>,
    pub circuit_breaker: bool,
    pub metadata: HashMap<String, Value>,
    pub hooks: JobHooks,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            id: None,
            enabled: true,
            priority: 0,
            timezone: None,
            max_concurrent: 1,
            timeout: None,
            max_retries: None,
            retry_delay: None,
            backoff: None,
            backoff_multiplier: None,
            max_retry_delay: None,
            circuit_breaker: true,
            metadata: HashMap::new(),
            hooks: JobHooks::default(),
        }
    }
}

impl JobOptions {
    pub fn overrides(&self) -> ExecutionOverrides {
        ExecutionOverrides {
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            backoff: self.backoff,
            backoff_multiplier: self.backoff_multiplier,
            max_retry_delay: self.max_retry_delay,
            circuit_breaker: Some(self.circuit_breaker),
        }
    }
}

/// 已注册的任务
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub schedule: Schedule,
    pub handler: Arc<dyn JobHandler>,
    pub options: JobOptions,
    pub next_run: Option<DateTime<Utc>>,
    pub concurrent_executions: usize,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("options", &self.options)
            .field("next_run", &self.next_run)
            .field("concurrent_executions", &self.concurrent_executions)
            .finish()
    }
}

impl Job {
    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn has_capacity(&self) -> bool {
        self.concurrent_executions < self.options.max_concurrent
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            enabled: self.options.enabled,
            priority: self.options.priority,
            timezone: self.options.timezone.clone(),
            max_concurrent: self.options.max_concurrent,
            timeout_ms: self.options.timeout.map(|t| t.as_millis() as u64),
            max_retries: self.options.max_retries,
            circuit_breaker: self.options.circuit_breaker,
            metadata: self.options.metadata.clone(),
            next_run: self.next_run,
            concurrent_executions: self.concurrent_executions,
            created_at: self.created_at,
        }
    }
}

/// 任务的只读快照（不含处理函数和钩子）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub priority: i32,
    pub timezone: Option<String>,
    pub max_concurrent: usize,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub circuit_breaker: bool,
    pub metadata: HashMap<String, Value>,
    pub next_run: Option<DateTime<Utc>>,
    pub concurrent_executions: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schedule_validation() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert!(Schedule::cron("0 * * * * *").validate(None, now).is_ok());
        assert!(Schedule::cron("bogus").validate(None, now).is_err());
        assert!(Schedule::every(Duration::from_millis(50))
            .validate(None, now)
            .is_ok());
        assert!(Schedule::every(Duration::ZERO).validate(None, now).is_err());

        let past = now - chrono::Duration::seconds(1);
        let err = Schedule::at(past).validate(None, now).unwrap_err();
        assert!(err.is_validation());
        assert!(Schedule::at(now).validate(None, now).is_err());
        let future = now + chrono::Duration::minutes(5);
        assert!(Schedule::at(future).validate(None, now).is_ok());

        let err = Schedule::every(Duration::from_secs(1))
            .validate(Some("Nowhere/Land"), now)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimezone(_)));
    }

    #[test]
    fn test_interval_beyond_datetime_range_is_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let huge = Schedule::every(Duration::from_secs(10_000_000_000_000));

        let err = huge.validate(None, now).unwrap_err();
        assert!(err.is_validation());
        assert!(huge.next_run(now, None).unwrap_err().is_validation());

        let unrepresentable = Schedule::every(Duration::MAX);
        assert!(unrepresentable.validate(None, now).unwrap_err().is_validation());
    }

    #[test]
    fn test_next_run_is_strictly_future() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let next = Schedule::every(Duration::from_millis(1500))
            .next_run(now, None)
            .unwrap()
            .unwrap();
        assert_eq!(next, now + chrono::Duration::milliseconds(1500));

        let next = Schedule::cron("0 * * * * *")
            .next_run(now, None)
            .unwrap()
            .unwrap();
        assert!(next > now);

        let at = now + chrono::Duration::seconds(30);
        assert_eq!(Schedule::at(at).next_run(now, None).unwrap(), Some(at));
        assert_eq!(Schedule::at(at).next_run(at, None).unwrap(), None);
    }

    #[test]
    fn test_schedule_kind_and_recurrence() {
        assert_eq!(Schedule::cron("* * * * * *").kind(), "cron");
        assert!(Schedule::every(Duration::from_secs(1)).is_recurring());
        assert!(!Schedule::at(Utc::now()).is_recurring());
    }

    #[test]
    fn test_job_options_overrides() {
        let options = JobOptions {
            timeout: Some(Duration::from_secs(3)),
            max_retries: Some(7),
            circuit_breaker: false,
            ..Default::default()
        };
        let overrides = options.overrides();
        assert_eq!(overrides.timeout, Some(Duration::from_secs(3)));
        assert_eq!(overrides.max_retries, Some(7));
        assert_eq!(overrides.circuit_breaker, Some(false));
        assert!(overrides.retry_delay.is_none());
    }

    #[tokio::test]
    async fn test_handler_fn_adapts_closure() {
        let handler = handler_fn(|ctx: JobContext| async move {
            Ok(serde_json::json!({ "attempt": ctx.attempt }))
        });
        let ctx = JobContext {
            job_id: "job".to_string(),
            job_name: "job".to_string(),
            execution_id: "exec".to_string(),
            attempt: 2,
            start_time: Utc::now(),
            metadata: HashMap::new(),
        };
        let value = handler.run(ctx).await.unwrap();
        assert_eq!(value["attempt"], 2);
    }
}
