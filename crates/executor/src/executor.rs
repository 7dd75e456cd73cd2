use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use scheduler_config::ExecutorConfig;
use scheduler_core::{
    CircuitBreakerRegistry, EventBus, ExecutionOverrides, ExecutionResult, JobContext,
    JobHandler, MemoryProbe, ProcessMemoryProbe, SchedulerError, SchedulerEvent,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::metrics;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct ActiveExecution {
    job_id: String,
    token: CancellationToken,
}

enum AttemptOutcome {
    Success(Value),
    Failed(String),
    TimedOut(Duration),
    Cancelled,
}

/// 单个任务执行器：重试、退避、超时、熔断、内存保护与取消
///
/// 每个任务ID对应一个熔断器，由内部的 [`CircuitBreakerRegistry`] 懒创建。
pub struct JobExecutor {
    config: ExecutorConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    memory_probe: Arc<dyn MemoryProbe>,
    events: EventBus,
    active: Mutex<HashMap<String, ActiveExecution>>,
    accepting: AtomicBool,
}

impl JobExecutor {
    pub fn new(
        config: ExecutorConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            breakers,
            memory_probe: Arc::new(ProcessMemoryProbe),
            events,
            active: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveExecution>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// 执行一次任务调用（内部处理全部重试），结果从不以错误形式返回
    pub async fn execute(
        &self,
        handler: Arc<dyn JobHandler>,
        context: JobContext,
        overrides: &ExecutionOverrides,
    ) -> ExecutionResult {
        let started = Instant::now();
        let job_id = context.job_id.clone();
        let execution_id = context.execution_id.clone();

        if !self.is_accepting() {
            return failure_before_start(SchedulerError::ShuttingDown, started);
        }

        if let Err(err) = self.check_memory(&job_id) {
            warn!(job_id = %job_id, execution_id = %execution_id, "内存超过阈值，跳过执行: {err}");
            let result = failure_before_start(err, started);
            metrics::record_execution(&job_id, result.status(), started.elapsed());
            self.events.publish(SchedulerEvent::ExecutionFailed {
                job_id,
                execution_id,
                attempts: 0,
                error: result.error.clone().unwrap_or_default(),
            });
            return result;
        }

        let token = CancellationToken::new();
        {
            let mut active = self.active();
            active.insert(
                execution_id.clone(),
                ActiveExecution {
                    job_id: job_id.clone(),
                    token: token.clone(),
                },
            );
            metrics::set_active_executions(active.len());
        }

        let start_memory = self.memory_probe.usage_bytes();
        let mut result = self.run_attempts(handler, context, overrides, &token).await;
        let end_memory = self.memory_probe.usage_bytes();

        {
            let mut active = self.active();
            active.remove(&execution_id);
            metrics::set_active_executions(active.len());
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result.memory_used = match (start_memory, end_memory) {
            (Some(start), Some(end)) => end as i64 - start as i64,
            _ => 0,
        };
        metrics::record_execution(&job_id, result.status(), started.elapsed());

        if result.success {
            self.events.publish(SchedulerEvent::ExecutionSuccess {
                job_id,
                execution_id,
                attempts: result.attempts,
            });
        } else if result.cancelled {
            info!(job_id = %job_id, execution_id = %execution_id, "任务执行已取消");
            self.events.publish(SchedulerEvent::ExecutionCancelled {
                job_id,
                execution_id,
            });
        } else {
            error!(
                job_id = %job_id,
                execution_id = %execution_id,
                attempts = result.attempts,
                circuit_breaker_tripped = result.circuit_breaker_tripped,
                timed_out = result.timed_out,
                "任务执行失败: {}",
                result.error.as_deref().unwrap_or("未知错误")
            );
            self.events.publish(SchedulerEvent::ExecutionFailed {
                job_id,
                execution_id,
                attempts: result.attempts,
                error: result.error.clone().unwrap_or_default(),
            });
        }

        result
    }

    async fn run_attempts(
        &self,
        handler: Arc<dyn JobHandler>,
        context: JobContext,
        overrides: &ExecutionOverrides,
        token: &CancellationToken,
    ) -> ExecutionResult {
        let job_id = context.job_id.clone();
        let max_attempts = overrides
            .max_retries
            .unwrap_or(self.config.max_retries)
            .saturating_add(1);
        let timeout = overrides
            .timeout
            .unwrap_or_else(|| self.config.default_timeout());
        let use_breaker =
            self.breakers.is_enabled() && overrides.circuit_breaker.unwrap_or(true);
        let backoff = BackoffPolicy::from_config(&self.config, overrides);

        let mut result = ExecutionResult::default();

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let permit = if use_breaker {
                match self.breakers.try_acquire(&job_id) {
                    Some(permit) => Some(permit),
                    None => {
                        result.circuit_breaker_tripped = true;
                        result.timed_out = false;
                        result.error =
                            Some(SchedulerError::CircuitOpen { job_id: job_id.clone() }.to_string());
                        break;
                    }
                }
            } else {
                None
            };

            result.attempts = attempt;
            result.timed_out = false;
            metrics::record_attempt(&job_id);

            let mut attempt_context = context.clone();
            attempt_context.attempt = attempt;
            attempt_context.start_time = chrono::Utc::now();

            let outcome = run_once(handler.clone(), attempt_context, timeout, token).await;
            let error = match outcome {
                AttemptOutcome::Success(value) => {
                    if let Some(permit) = permit {
                        self.breakers.record_success(&job_id, permit);
                    }
                    result.success = true;
                    result.value = Some(value);
                    result.error = None;
                    return result;
                }
                AttemptOutcome::Cancelled => {
                    if let Some(permit) = permit {
                        self.breakers.abandon(&job_id, permit);
                    }
                    result.cancelled = true;
                    result.error = Some(SchedulerError::Cancelled.to_string());
                    break;
                }
                AttemptOutcome::TimedOut(limit) => {
                    result.timed_out = true;
                    SchedulerError::ExecutionTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    }
                    .to_string()
                }
                AttemptOutcome::Failed(message) => message,
            };
            result.error = Some(error.clone());

            let breaker_open =
                permit.is_some_and(|permit| self.breakers.record_failure(&job_id, permit));

            if attempt >= max_attempts {
                break;
            }
            if breaker_open {
                // 熔断器阻止了后续重试
                result.circuit_breaker_tripped = true;
                result.timed_out = false;
                break;
            }
            if !self.is_accepting() {
                debug!(job_id = %job_id, "执行器正在关闭，放弃后续重试");
                break;
            }

            let delay = backoff.delay_for(attempt);
            warn!(
                job_id = %job_id,
                execution_id = %context.execution_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "任务执行失败，准备重试: {error}"
            );
            self.events.publish(SchedulerEvent::ExecutionRetry {
                job_id: job_id.clone(),
                execution_id: context.execution_id.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error,
            });

            tokio::select! {
                _ = token.cancelled() => {
                    result.cancelled = true;
                    result.timed_out = false;
                    result.error = Some(SchedulerError::Cancelled.to_string());
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        result
    }

    fn check_memory(&self, job_id: &str) -> Result<(), SchedulerError> {
        let Some(threshold) = self.config.memory_threshold_bytes() else {
            return Ok(());
        };
        let Some(used) = self.memory_probe.usage_bytes() else {
            return Ok(());
        };
        if used <= threshold {
            return Ok(());
        }

        self.events.publish(SchedulerEvent::MemoryThresholdExceeded {
            job_id: job_id.to_string(),
            used_bytes: used,
            threshold_bytes: threshold,
        });
        warn!(job_id, used_bytes = used, threshold_bytes = threshold, "内存使用超过阈值，尝试回收");
        self.memory_probe.reclaim();

        match self.memory_probe.usage_bytes() {
            Some(after) if after > threshold => Err(SchedulerError::MemoryThresholdExceeded {
                used_bytes: after,
                threshold_bytes: threshold,
            }),
            _ => Ok(()),
        }
    }

    /// 取消指定的执行，返回该执行是否存在
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.active().get(execution_id) {
            Some(active) => {
                info!(job_id = %active.job_id, execution_id, "取消任务执行");
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有正在进行的执行，返回被取消的数量
    pub fn cancel_all_executions(&self) -> usize {
        let active = self.active();
        for execution in active.values() {
            execution.token.cancel();
        }
        active.len()
    }

    /// 停止接收新任务，在宽限期内等待执行完成，超时后强制取消；返回被强制取消的数量
    pub async fn shutdown(&self, grace_period: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + grace_period;

        while self.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        let remaining = self.active_count();
        if remaining > 0 {
            warn!(remaining, "执行器关闭宽限期已过，强制取消剩余任务");
            self.cancel_all_executions();
        }
        info!("执行器已关闭");
        remaining
    }
}

fn failure_before_start(err: SchedulerError, started: Instant) -> ExecutionResult {
    ExecutionResult {
        success: false,
        error: Some(err.to_string()),
        attempts: 0,
        duration_ms: started.elapsed().as_millis() as u64,
        ..Default::default()
    }
}

/// 在独立任务中运行处理函数，与超时和取消竞争；失败的一方被中止
async fn run_once(
    handler: Arc<dyn JobHandler>,
    context: JobContext,
    timeout: Duration,
    token: &CancellationToken,
) -> AttemptOutcome {
    let mut task = tokio::spawn(async move { handler.run(context).await });
    let abort = task.abort_handle();

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            abort.abort();
            AttemptOutcome::Cancelled
        }
        joined = tokio::time::timeout(timeout, &mut task) => match joined {
            Err(_) => {
                abort.abort();
                AttemptOutcome::TimedOut(timeout)
            }
            Ok(Ok(Ok(value))) => AttemptOutcome::Success(value),
            Ok(Ok(Err(err))) => AttemptOutcome::Failed(format!("{err:#}")),
            Ok(Err(join_err)) if join_err.is_panic() => {
                AttemptOutcome::Failed(format!("任务处理函数panic: {join_err}"))
            }
            Ok(Err(join_err)) => AttemptOutcome::Failed(join_err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_config::CircuitBreakerConfig;
    use scheduler_core::{handler_fn, BackoffStrategy, ExecutionStatus, MockMemoryProbe};
    use std::sync::atomic::AtomicU32;

    fn executor(config: ExecutorConfig) -> JobExecutor {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            enabled: false,
            ..Default::default()
        }));
        JobExecutor::new(config, breakers, EventBus::new())
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            retry_delay_ms: 5,
            max_retry_delay_ms: 20,
            default_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn context(job_id: &str) -> JobContext {
        JobContext {
            job_id: job_id.to_string(),
            job_name: job_id.to_string(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            attempt: 0,
            start_time: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let executor = executor(fast_config());
        let handler = handler_fn(|ctx: JobContext| async move {
            Ok(serde_json::json!({ "attempt": ctx.attempt }))
        });

        let result = executor
            .execute(handler, context("ok"), &ExecutionOverrides::default())
            .await;

        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.value.unwrap()["attempt"], 1);
        assert_eq!(executor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let executor = executor(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |_ctx: JobContext| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient")
                }
                Ok(Value::Null)
            }
        });

        let result = executor
            .execute(handler, context("flaky"), &ExecutionOverrides::default())
            .await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_uses_all_attempts() {
        let executor = executor(fast_config());
        let handler = handler_fn(|_ctx: JobContext| async move { anyhow::bail!("boom") });
        let overrides = ExecutionOverrides {
            max_retries: Some(3),
            ..Default::default()
        };

        let result = executor.execute(handler, context("boom"), &overrides).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.status(), ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_flags_last_attempt() {
        let executor = executor(fast_config());
        let handler = handler_fn(|_ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });
        let overrides = ExecutionOverrides {
            timeout: Some(Duration::from_millis(30)),
            max_retries: Some(1),
            ..Default::default()
        };

        let result = executor.execute(handler, context("slow"), &overrides).await;

        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.status(), ExecutionStatus::Timeout);
        assert!(result.duration_ms < 1_000);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_failed_attempt() {
        let executor = executor(fast_config());
        let handler = handler_fn(|ctx: JobContext| async move {
            if ctx.attempt < 10 {
                panic!("handler exploded");
            }
            Ok(Value::Null)
        });
        let overrides = ExecutionOverrides {
            max_retries: Some(0),
            ..Default::default()
        };

        let result = executor.execute(handler, context("panic"), &overrides).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert!(result.error.unwrap().contains("panic"));
    }

    #[tokio::test]
    async fn test_breaker_trips_and_short_circuits() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
        }));
        let executor = JobExecutor::new(fast_config(), breakers.clone(), EventBus::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |_ctx: JobContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("down")
            }
        });
        let overrides = ExecutionOverrides {
            max_retries: Some(5),
            ..Default::default()
        };

        let result = executor
            .execute(handler.clone(), context("fragile"), &overrides)
            .await;
        assert!(result.circuit_breaker_tripped);
        assert!(!result.timed_out);
        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 打开状态下不会调用处理函数
        let result = executor.execute(handler, context("fragile"), &overrides).await;
        assert!(result.circuit_breaker_tripped);
        assert_eq!(result.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_job_can_opt_out_of_breaker() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 1,
            reset_timeout_ms: 60_000,
        }));
        let executor = JobExecutor::new(fast_config(), breakers, EventBus::new());
        let handler = handler_fn(|_ctx: JobContext| async move { anyhow::bail!("down") });
        let overrides = ExecutionOverrides {
            max_retries: Some(2),
            circuit_breaker: Some(false),
            ..Default::default()
        };

        let result = executor.execute(handler, context("no-cb"), &overrides).await;
        assert!(!result.circuit_breaker_tripped);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_linear_backoff_attempt_count() {
        let executor = executor(fast_config());
        let handler = handler_fn(|_ctx: JobContext| async move { anyhow::bail!("boom") });
        let overrides = ExecutionOverrides {
            max_retries: Some(2),
            retry_delay: Some(Duration::from_millis(10)),
            backoff: Some(BackoffStrategy::Linear),
            ..Default::default()
        };

        let started = Instant::now();
        let result = executor.execute(handler, context("linear"), &overrides).await;

        assert_eq!(result.attempts, 3);
        // 10ms + 20ms，各自 ±20%
        assert!(started.elapsed() >= Duration::from_millis(24));
    }

    #[tokio::test]
    async fn test_cancel_execution_interrupts_attempt() {
        let executor = Arc::new(executor(fast_config()));
        let handler = handler_fn(|_ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });
        let ctx = context("long");
        let execution_id = ctx.execution_id.clone();

        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(handler, ctx, &ExecutionOverrides::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(executor.active_count(), 1);
        assert!(executor.cancel_execution(&execution_id));
        assert!(!executor.cancel_execution("unknown"));

        let result = runner.await.unwrap();
        assert!(result.cancelled);
        assert!(!result.success);
        assert_eq!(result.status(), ExecutionStatus::Cancelled);
        assert_eq!(executor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_guard_skips_handler() {
        let mut probe = MockMemoryProbe::new();
        probe.expect_usage_bytes().returning(|| Some(512 * 1024 * 1024));
        probe.expect_reclaim().times(1).return_const(());

        let config = ExecutorConfig {
            memory_threshold_mb: Some(100),
            ..fast_config()
        };
        let executor = executor(config).with_memory_probe(Arc::new(probe));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |_ctx: JobContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

        let result = executor
            .execute(handler, context("hungry"), &ExecutionOverrides::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.error.unwrap().contains("内存"));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let executor = executor(fast_config());
        assert_eq!(executor.shutdown(Duration::from_millis(10)).await, 0);

        let handler = handler_fn(|_ctx: JobContext| async move { Ok(Value::Null) });
        let result = executor
            .execute(handler, context("late"), &ExecutionOverrides::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_shutdown_force_cancels_after_grace() {
        let executor = Arc::new(executor(fast_config()));
        let handler = handler_fn(|_ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });

        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(handler, context("stuck"), &ExecutionOverrides::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let forced = executor.shutdown(Duration::from_millis(60)).await;
        assert_eq!(forced, 1);
        assert!(runner.await.unwrap().cancelled);
    }
}
