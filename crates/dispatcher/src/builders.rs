//! 链式注册任务
//!
//! ```ignore
//! scheduler
//!     .cron("0 0 3 * * *")
//!     .timezone("Asia/Shanghai")
//!     .name("nightly-report")
//!     .retries(2)
//!     .register(handler)
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{
    handler_fn, BackoffStrategy, ExecutionResult, JobContext, JobHandler, JobId, JobOptions,
    Schedule, SchedulerResult,
};
use serde_json::Value;

use crate::scheduler::JobScheduler;

impl JobScheduler {
    /// 固定间隔执行
    pub fn every(&self, interval: Duration) -> JobBuilder<'_> {
        JobBuilder::new(self, Schedule::every(interval))
    }

    pub fn cron(&self, expression: impl Into<String>) -> JobBuilder<'_> {
        JobBuilder::new(self, Schedule::cron(expression))
    }

    /// 在指定时间执行一次
    pub fn at(&self, at: DateTime<Utc>) -> JobBuilder<'_> {
        JobBuilder::new(self, Schedule::at(at))
    }
}

#[must_use = "调用 register 才会注册任务"]
pub struct JobBuilder<'a> {
    scheduler: &'a JobScheduler,
    schedule: Schedule,
    name: Option<String>,
    options: JobOptions,
}

impl<'a> JobBuilder<'a> {
    fn new(scheduler: &'a JobScheduler, schedule: Schedule) -> Self {
        Self {
            scheduler,
            schedule,
            name: None,
            options: JobOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.options.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.options.max_concurrent = max_concurrent;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = Some(max_retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = Some(delay);
        self
    }

    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.options.backoff = Some(strategy);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.options.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.options.max_retry_delay = Some(delay);
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.options.timezone = Some(timezone.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.metadata.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.options.enabled = false;
        self
    }

    /// 关闭该任务的熔断保护
    pub fn without_circuit_breaker(mut self) -> Self {
        self.options.circuit_breaker = false;
        self
    }

    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext) + Send + Sync + 'static,
    {
        self.options.hooks.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext, &ExecutionResult) + Send + Sync + 'static,
    {
        self.options.hooks.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext, &ExecutionResult) + Send + Sync + 'static,
    {
        self.options.hooks.on_error = Some(Arc::new(hook));
        self
    }

    pub async fn register(self, handler: Arc<dyn JobHandler>) -> SchedulerResult<JobId> {
        let name = self.name.unwrap_or_else(|| {
            let uuid = uuid::Uuid::new_v4().simple().to_string();
            format!("job-{}", &uuid[..8])
        });
        self.scheduler
            .register_job(&name, self.schedule, handler, self.options)
            .await
    }

    pub async fn register_fn<F, Fut>(self, f: F) -> SchedulerResult<JobId>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(handler_fn(f)).await
    }
}
