use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use scheduler_config::{AppConfig, SchedulerConfig};
use scheduler_core::{
    local_hostname, CircuitBreakerRegistry, EventBus, Execution, ExecutionResult, Job,
    JobContext, JobHandler, JobId, JobInfo, JobMetrics, JobOptions, JobState, LockBackend,
    Schedule, SchedulerError, SchedulerEvent, SchedulerLogger, SchedulerResult, StateStore,
    TracingLogger,
};
use scheduler_executor::JobExecutor;
use scheduler_infrastructure::{create_lock_backend, JsonFileStateStore};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::leader_election::LeaderElection;
use crate::queue::PendingQueue;
use crate::state_manager::JobStateManager;

const COMPONENT: &str = "scheduler";
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 调度器运行统计
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub instance_id: String,
    pub total_jobs: usize,
    pub enabled_jobs: usize,
    pub running_executions: usize,
    pub pending_executions: usize,
    pub is_leader: bool,
    pub started: bool,
    pub uptime_ms: u64,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<JobId, Job>,
    // 定时器代数用于识别被替换掉的旧定时器
    timers: HashMap<JobId, (u64, JoinHandle<()>)>,
    pending: PendingQueue,
    running: usize,
    timer_gen: u64,
}

impl SchedulerState {
    fn cancel_timer(&mut self, job_id: &str) {
        if let Some((_, handle)) = self.timers.remove(job_id) {
            handle.abort();
        }
    }

    fn cancel_all_timers(&mut self) -> usize {
        let count = self.timers.len();
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
        count
    }

    /// 占用全局和任务级并发名额，返回用于执行的任务快照
    fn reserve(&mut self, job_id: &str) -> Option<Job> {
        let job = self.jobs.get_mut(job_id)?;
        job.concurrent_executions += 1;
        let job = job.clone();
        self.running += 1;
        Some(job)
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    instance_id: String,
    state: Mutex<SchedulerState>,
    executor: Arc<JobExecutor>,
    state_manager: Arc<JobStateManager>,
    leader: Arc<LeaderElection>,
    events: EventBus,
    logger: RwLock<Arc<dyn SchedulerLogger>>,
    started: AtomicBool,
    shutting_down: AtomicBool,
    started_at: StdMutex<Option<Instant>>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
}

/// 任务调度器
///
/// 只有主节点会为任务布置定时器；所有实例都可以手动触发任务。
/// 执行受全局 `max_concurrent_jobs` 和任务级 `max_concurrent` 两道闸门约束，
/// 饱和时进入按优先级出队的待执行队列。
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    /// 按配置创建锁后端和状态存储
    pub async fn from_config(config: &AppConfig) -> SchedulerResult<Self> {
        let lock = create_lock_backend(&config.leader_election).await?;
        let store: Option<Arc<dyn StateStore>> = if config.state.enabled {
            Some(Arc::new(JsonFileStateStore::new(&config.state.path)))
        } else {
            None
        };
        Ok(Self::with_backends(config, lock, store))
    }

    pub fn with_backends(
        config: &AppConfig,
        lock: Option<Arc<dyn LockBackend>>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        let instance_id = config
            .scheduler
            .instance_id
            .clone()
            .unwrap_or_else(generate_instance_id);
        let events = EventBus::new();

        let breakers = Arc::new(
            CircuitBreakerRegistry::new(config.circuit_breaker.clone()).with_events(events.clone()),
        );
        let executor = Arc::new(JobExecutor::new(
            config.executor.clone(),
            breakers,
            events.clone(),
        ));
        let state_manager = Arc::new(JobStateManager::new(&config.state, store, events.clone()));
        let leader = Arc::new(LeaderElection::new(
            config.leader_election.clone(),
            instance_id.clone(),
            lock,
            events.clone(),
        ));

        Self {
            inner: Arc::new(SchedulerInner {
                config: config.scheduler.clone(),
                instance_id,
                state: Mutex::new(SchedulerState::default()),
                executor,
                state_manager,
                leader,
                events,
                logger: RwLock::new(Arc::new(TracingLogger)),
                started: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                started_at: StdMutex::new(None),
                watcher: StdMutex::new(None),
            }),
        }
    }

    pub fn set_logger(&self, logger: Arc<dyn SchedulerLogger>) {
        if let Ok(mut current) = self.inner.logger.write() {
            *current = logger;
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn is_leader(&self) -> bool {
        self.inner.leader.is_leader()
    }

    pub fn leader_election(&self) -> &Arc<LeaderElection> {
        &self.inner.leader
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.inner.executor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// 注册任务。校验失败时同步返回错误，任务不会被保存
    pub async fn register_job(
        &self,
        name: &str,
        schedule: Schedule,
        handler: Arc<dyn JobHandler>,
        options: JobOptions,
    ) -> SchedulerResult<JobId> {
        let inner = &self.inner;
        if inner.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SchedulerError::validation_error("任务名称不能为空"));
        }
        if options.max_concurrent == 0 {
            return Err(SchedulerError::validation_error(format!(
                "任务 {name} 的最大并发数必须大于0"
            )));
        }

        let now = Utc::now();
        let timezone = options.timezone.as_deref();
        schedule.validate(timezone, now)?;
        let next_run = schedule.next_run(now, timezone)?.ok_or_else(|| {
            SchedulerError::validation_error(format!("任务 {name} 无法计算下次执行时间"))
        })?;

        let job_id = options.id.clone().unwrap_or_else(|| name.to_string());
        if job_id.trim().is_empty() {
            return Err(SchedulerError::validation_error("任务ID不能为空"));
        }
        let enabled = options.enabled;

        {
            let mut state = inner.state.lock().await;
            if state.jobs.contains_key(&job_id) {
                return Err(SchedulerError::validation_error(format!(
                    "任务ID已存在: {job_id}"
                )));
            }
            if state.jobs.values().any(|job| job.name == name) {
                return Err(SchedulerError::validation_error(format!(
                    "任务名称已存在: {name}"
                )));
            }
            state.jobs.insert(
                job_id.clone(),
                Job {
                    id: job_id.clone(),
                    name: name.to_string(),
                    schedule: schedule.clone(),
                    handler,
                    options,
                    next_run: Some(next_run),
                    concurrent_executions: 0,
                    created_at: now,
                },
            );
        }

        inner
            .state_manager
            .register_job(&job_id, name, enabled, Some(next_run))
            .await;

        // 状态登记完成后再布置定时器，保证首次执行能找到聚合状态
        if enabled && inner.leader.is_leader() && !inner.is_shutting_down() {
            let mut state = inner.state.lock().await;
            if state.jobs.contains_key(&job_id) && !state.timers.contains_key(&job_id) {
                inner.arm_timer(&mut state, &job_id, next_run);
            }
        }

        info!(job_id = %job_id, name, schedule = schedule.kind(), next_run = %next_run, "任务已注册");
        inner.log().info(
            "任务已注册",
            COMPONENT,
            &json!({ "job_id": job_id, "name": name, "schedule": schedule, "next_run": next_run }),
        );
        inner.events.publish(SchedulerEvent::JobRegistered {
            job_id: job_id.clone(),
            name: name.to_string(),
            next_run: Some(next_run),
        });
        gauge!("scheduler_registered_jobs").increment(1.0);

        Ok(job_id)
    }

    /// 注销任务；正在运行的执行会正常结束
    pub async fn unregister_job(&self, job_id: &str) -> SchedulerResult<()> {
        let inner = &self.inner;
        let removed_pending = {
            let mut state = inner.state.lock().await;
            if state.jobs.remove(job_id).is_none() {
                return Err(SchedulerError::job_not_found(job_id));
            }
            state.cancel_timer(job_id);
            state.pending.remove_job(job_id)
        };

        inner.state_manager.unregister_job(job_id).await;
        inner.executor.breakers().remove(job_id);

        info!(job_id, removed_pending, "任务已注销");
        inner.log().info("任务已注销", COMPONENT, &json!({ "job_id": job_id }));
        inner.events.publish(SchedulerEvent::JobUnregistered {
            job_id: job_id.to_string(),
        });
        gauge!("scheduler_registered_jobs").decrement(1.0);
        Ok(())
    }

    pub async fn set_job_enabled(&self, job_id: &str, enabled: bool) -> SchedulerResult<()> {
        let inner = &self.inner;
        let next_run = {
            let mut state = inner.state.lock().await;
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| SchedulerError::job_not_found(job_id))?;
            job.options.enabled = enabled;

            if enabled {
                if inner.leader.is_leader()
                    && !inner.is_shutting_down()
                    && !state.timers.contains_key(job_id)
                {
                    inner.schedule_next(&mut state, job_id, Utc::now())
                } else {
                    state.jobs.get(job_id).and_then(|job| job.next_run)
                }
            } else {
                state.cancel_timer(job_id);
                None
            }
        };

        inner.state_manager.set_enabled(job_id, enabled).await;
        inner.state_manager.set_next_run(job_id, next_run).await;

        info!(job_id, enabled, "任务启用状态已变更");
        inner.events.publish(SchedulerEvent::JobEnabled {
            job_id: job_id.to_string(),
            enabled,
        });
        Ok(())
    }

    /// 手动触发一次执行，同样受并发闸门约束
    pub async fn trigger_job(&self, job_id: &str) -> SchedulerResult<()> {
        if self.inner.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        debug!(job_id, "手动触发任务");
        self.inner.queue_job_execution(job_id, true).await
    }

    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        self.inner.executor.cancel_execution(execution_id)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        self.inner.state.lock().await.jobs.get(job_id).map(Job::info)
    }

    pub async fn get_all_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .inner
            .state
            .lock()
            .await
            .jobs
            .values()
            .map(Job::info)
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        let (total_jobs, enabled_jobs, running_executions, pending_executions) = {
            let state = inner.state.lock().await;
            (
                state.jobs.len(),
                state.jobs.values().filter(|job| job.is_enabled()).count(),
                state.running,
                state.pending.len(),
            )
        };
        let uptime_ms = inner
            .started_at
            .lock()
            .ok()
            .and_then(|started| *started)
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();

        SchedulerStats {
            instance_id: inner.instance_id.clone(),
            total_jobs,
            enabled_jobs,
            running_executions,
            pending_executions,
            is_leader: inner.leader.is_leader(),
            started: inner.started.load(Ordering::SeqCst),
            uptime_ms,
        }
    }

    pub async fn get_job_state(&self, job_id: &str) -> Option<JobState> {
        self.inner.state_manager.get_state(job_id).await
    }

    pub async fn get_job_history(&self, job_id: &str, limit: usize) -> Vec<Execution> {
        self.inner.state_manager.get_history(job_id, limit).await
    }

    pub async fn get_job_metrics(&self, job_id: &str) -> Option<JobMetrics> {
        self.inner.state_manager.get_metrics(job_id).await
    }

    pub fn state_manager(&self) -> &Arc<JobStateManager> {
        &self.inner.state_manager
    }

    /// 恢复状态、启动持久化与选主，并跟随领导权布置或撤销定时器
    pub async fn start(&self) -> SchedulerResult<()> {
        let inner = &self.inner;
        if inner.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            warn!("调度器已经启动");
            return Ok(());
        }
        if let Ok(mut started_at) = inner.started_at.lock() {
            *started_at = Some(Instant::now());
        }

        info!(instance_id = %inner.instance_id, "启动任务调度器");

        let crashed = inner.state_manager.load_state().await;
        if !crashed.is_empty() {
            inner.log().warn(
                "上次运行中断的执行",
                COMPONENT,
                &json!({ "executions": crashed }),
            );
        }
        inner.state_manager.start();

        // 先订阅再启动选主，避免漏掉首次当选
        let mut leadership = inner.leader.watch_leadership();
        inner.leader.start();

        let weak = Arc::downgrade(inner);
        let watcher = tokio::spawn(async move {
            loop {
                let leading = *leadership.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if leading {
                    inner.schedule_all().await;
                } else {
                    inner.unschedule_all().await;
                }
                drop(inner);
                if leadership.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Ok(mut slot) = inner.watcher.lock() {
            *slot = Some(watcher);
        }

        inner.events.publish(SchedulerEvent::SchedulerStarted {
            instance_id: inner.instance_id.clone(),
        });
        Ok(())
    }

    /// 优雅关闭：停止调度、清空待执行队列、等待运行中的执行，超时后强制取消
    pub async fn shutdown(&self) -> SchedulerResult<()> {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(instance_id = %inner.instance_id, "开始关闭任务调度器");

        if let Some(watcher) = inner.watcher.lock().ok().and_then(|mut slot| slot.take()) {
            watcher.abort();
        }

        let (timers, cleared) = {
            let mut state = inner.state.lock().await;
            (state.cancel_all_timers(), state.pending.clear())
        };
        gauge!("scheduler_pending_executions").set(0.0);
        debug!(timers, cleared, "已撤销定时器并清空待执行队列");

        let graceful = inner.wait_for_idle(inner.config.graceful_shutdown_timeout()).await;
        let mut forced = 0;
        if !graceful {
            forced = inner.executor.cancel_all_executions();
            warn!(forced, "等待超时，强制取消运行中的执行");
            // 给被取消的执行留出写入终态的时间
            inner
                .wait_for_idle(inner.executor.config().shutdown_grace_period())
                .await;
        }

        let grace = inner.executor.config().shutdown_grace_period();
        let (executor_forced, (), ()) = tokio::join!(
            inner.executor.shutdown(grace),
            inner.state_manager.shutdown(),
            inner.leader.shutdown(),
        );
        forced += executor_forced;

        info!(instance_id = %inner.instance_id, forced, "任务调度器已关闭");
        inner.events.publish(SchedulerEvent::SchedulerShutdown {
            instance_id: inner.instance_id.clone(),
            forced_cancellations: forced,
        });
        Ok(())
    }
}

impl SchedulerInner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn log(&self) -> Arc<dyn SchedulerLogger> {
        self.logger
            .read()
            .map(|logger| logger.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn arm_timer(self: &Arc<Self>, state: &mut SchedulerState, job_id: &str, fire_at: DateTime<Utc>) {
        state.timer_gen += 1;
        let generation = state.timer_gen;
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak = Arc::downgrade(self);
        let id = job_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(&id, generation).await;
            }
        });
        if let Some((_, old)) = state.timers.insert(job_id.to_string(), (generation, handle)) {
            old.abort();
        }
        debug!(job_id, fire_at = %fire_at, "定时器已布置");
    }

    /// 计算严格晚于 `after` 的下次执行时间并布置定时器
    fn schedule_next(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        job_id: &str,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let job = state.jobs.get_mut(job_id)?;
        let next_run = match job
            .schedule
            .next_run(after, job.options.timezone.as_deref())
        {
            Ok(next_run) => next_run,
            Err(e) => {
                error!(job_id, "计算下次执行时间失败: {e}");
                None
            }
        };
        job.next_run = next_run;
        if let Some(fire_at) = next_run {
            self.arm_timer(state, job_id, fire_at);
        }
        next_run
    }

    async fn on_timer(self: &Arc<Self>, job_id: &str, generation: u64) {
        {
            let mut state = self.state.lock().await;
            match state.timers.get(job_id) {
                Some((current, _)) if *current == generation => {
                    state.timers.remove(job_id);
                }
                _ => return,
            }
            let Some(job) = state.jobs.get(job_id) else {
                return;
            };
            if !job.is_enabled() || !self.leader.is_leader() || self.is_shutting_down() {
                return;
            }
        }

        debug!(job_id, "定时器触发");
        if let Err(e) = self.queue_job_execution(job_id, false).await {
            warn!(job_id, "任务入队失败: {e}");
        }
    }

    /// 两道闸门都有余量时立即执行，否则进入待执行队列
    async fn queue_job_execution(self: &Arc<Self>, job_id: &str, manual: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| SchedulerError::job_not_found(job_id))?;
        if !manual && (!job.is_enabled() || !self.leader.is_leader()) {
            return Ok(());
        }
        let priority = job.options.priority;

        if state.running < self.config.max_concurrent_jobs && job.has_capacity() {
            if let Some(job) = state.reserve(job_id) {
                drop(state);
                self.spawn_execution(job);
            }
            return Ok(());
        }

        let pending = state.pending.push_back(job_id.to_string(), priority, manual);
        drop(state);

        debug!(job_id, pending, "并发已满，任务进入待执行队列");
        gauge!("scheduler_pending_executions").set(pending as f64);
        counter!("scheduler_jobs_queued_total").increment(1);
        self.events.publish(SchedulerEvent::JobQueued {
            job_id: job_id.to_string(),
            pending,
        });
        Ok(())
    }

    fn spawn_execution(self: &Arc<Self>, job: Job) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_job(job).await;
        });
    }

    async fn run_job(self: &Arc<Self>, job: Job) {
        let execution_id = self.state_manager.start_execution(&job.id).await;
        let context = JobContext {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            execution_id: execution_id.clone(),
            attempt: 1,
            start_time: Utc::now(),
            metadata: job.options.metadata.clone(),
        };

        self.events.publish(SchedulerEvent::JobStart {
            job_id: job.id.clone(),
            execution_id: execution_id.clone(),
        });
        if let Some(hook) = &job.options.hooks.on_start {
            run_hook(&job.id, "on_start", || hook(&context));
        }

        let result = self
            .executor
            .execute(job.handler.clone(), context.clone(), &job.options.overrides())
            .await;
        let status = result.status();

        self.state_manager
            .end_execution(
                &execution_id,
                status,
                result.error.clone(),
                result.attempts.saturating_sub(1),
            )
            .await;
        counter!("scheduler_job_runs_total", "status" => status.as_str()).increment(1);

        if result.success {
            if let Some(hook) = &job.options.hooks.on_complete {
                run_hook(&job.id, "on_complete", || hook(&context, &result));
            }
            self.events.publish(SchedulerEvent::JobComplete {
                job_id: job.id.clone(),
                execution_id,
                duration_ms: result.duration_ms,
            });
        } else {
            if let Some(hook) = &job.options.hooks.on_error {
                run_hook(&job.id, "on_error", || hook(&context, &result));
            }
            self.report_failure(&job, &execution_id, &result);
            self.events.publish(SchedulerEvent::JobError {
                job_id: job.id.clone(),
                execution_id,
                status,
                error: result.error.clone(),
            });
        }

        self.finish_execution(&job.id).await;
    }

    fn report_failure(&self, job: &Job, execution_id: &str, result: &ExecutionResult) {
        self.log().error(
            "任务执行失败",
            COMPONENT,
            &json!({
                "job_id": job.id,
                "execution_id": execution_id,
                "status": result.status(),
                "attempts": result.attempts,
                "error": result.error,
                "circuit_breaker_tripped": result.circuit_breaker_tripped,
            }),
        );
    }

    /// 归还并发名额、按需重新布置定时器，并从待执行队列补位
    async fn finish_execution(self: &Arc<Self>, job_id: &str) {
        let mut disabled = false;
        let mut next_run = None;

        let dispatch = {
            let mut state = self.state.lock().await;
            state.running = state.running.saturating_sub(1);

            let mut reschedule = false;
            if let Some(job) = state.jobs.get_mut(job_id) {
                job.concurrent_executions = job.concurrent_executions.saturating_sub(1);
                if !job.schedule.is_recurring() {
                    if job.options.enabled {
                        job.options.enabled = false;
                        job.next_run = None;
                        disabled = true;
                    }
                } else {
                    reschedule = job.options.enabled;
                }
            }
            if disabled {
                state.cancel_timer(job_id);
            }

            if reschedule
                && self.leader.is_leader()
                && !self.is_shutting_down()
                && !state.timers.contains_key(job_id)
            {
                next_run = self.schedule_next(&mut state, job_id, Utc::now());
            }

            self.drain_pending(&mut state)
        };

        for job in dispatch {
            self.spawn_execution(job);
        }

        if disabled {
            info!(job_id, "一次性任务已执行，自动禁用");
            self.state_manager.set_enabled(job_id, false).await;
            self.state_manager.set_next_run(job_id, None).await;
        } else if next_run.is_some() {
            self.state_manager.set_next_run(job_id, next_run).await;
        }
    }

    /// 按优先级从队首派发，遇到第一个放不下的条目即放回队首并停止
    fn drain_pending(&self, state: &mut SchedulerState) -> Vec<Job> {
        let mut dispatch = Vec::new();
        if state.pending.is_empty() || self.is_shutting_down() {
            return dispatch;
        }
        state.pending.sort_by_priority();

        while state.running < self.config.max_concurrent_jobs {
            let Some(entry) = state.pending.pop_front() else {
                break;
            };
            let Some(job) = state.jobs.get(&entry.job_id) else {
                debug!(job_id = %entry.job_id, "任务已注销，丢弃待执行条目");
                continue;
            };
            if !entry.manual && !job.is_enabled() {
                debug!(job_id = %entry.job_id, "任务已禁用，丢弃待执行条目");
                continue;
            }
            if !entry.manual && !self.leader.is_leader() {
                debug!(job_id = %entry.job_id, "已不是主节点，丢弃定时触发的待执行条目");
                continue;
            }
            if !job.has_capacity() {
                state.pending.push_front(entry);
                break;
            }
            if let Some(job) = state.reserve(&entry.job_id) {
                dispatch.push(job);
            }
        }

        gauge!("scheduler_pending_executions").set(state.pending.len() as f64);
        dispatch
    }

    /// 成为主节点后为所有启用的任务布置定时器
    async fn schedule_all(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let now = Utc::now();
        let mut overdue = Vec::new();
        let mut updates = Vec::new();

        {
            let mut state = self.state.lock().await;
            let candidates: Vec<JobId> = state
                .jobs
                .values()
                .filter(|job| job.is_enabled() && !state.timers.contains_key(&job.id))
                .map(|job| job.id.clone())
                .collect();

            for job_id in candidates {
                let Some(job) = state.jobs.get(&job_id) else {
                    continue;
                };
                let missed_once = matches!(job.schedule, Schedule::OneTime { at } if at <= now);
                let upcoming = job.next_run.filter(|next_run| *next_run > now);

                if missed_once {
                    // 作为从节点期间错过的一次性任务立即执行
                    overdue.push(job_id);
                } else if let Some(next_run) = upcoming {
                    self.arm_timer(&mut state, &job_id, next_run);
                } else {
                    let next_run = self.schedule_next(&mut state, &job_id, now);
                    updates.push((job_id, next_run));
                }
            }
            info!(
                timers = state.timers.len(),
                overdue = overdue.len(),
                "已为启用的任务布置定时器"
            );
        }

        for (job_id, next_run) in updates {
            self.state_manager.set_next_run(&job_id, next_run).await;
        }
        for job_id in overdue {
            if let Err(e) = self.queue_job_execution(&job_id, false).await {
                warn!(job_id = %job_id, "补偿执行一次性任务失败: {e}");
            }
        }
    }

    /// 失去领导权后撤销定时器并丢弃定时触发的待执行条目，运行中的执行和手动触发不受影响
    async fn unschedule_all(&self) {
        let mut state = self.state.lock().await;
        let cancelled = state.cancel_all_timers();
        let dropped = state.pending.drop_scheduled();
        gauge!("scheduler_pending_executions").set(state.pending.len() as f64);
        drop(state);
        if cancelled > 0 || dropped > 0 {
            info!(cancelled, dropped, "已撤销所有定时器");
        }
    }

    async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let running = self.state.lock().await.running;
            if running == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(running, "等待运行中的执行结束超时");
                return false;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}

fn run_hook(job_id: &str, hook: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(job_id, hook, "任务钩子发生panic，已忽略");
    }
}

fn generate_instance_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", local_hostname(), std::process::id(), &uuid[..8])
}
