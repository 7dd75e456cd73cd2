use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_config::StateConfig;
use scheduler_core::{
    local_hostname, EventBus, Execution, ExecutionStatus, JobId, JobMetrics, JobState,
    MemoryProbe, MemorySnapshot, ProcessMemoryProbe, RunningExecutionRecord, SchedulerEvent,
    StateSnapshot, StateStore,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct StateInner {
    jobs: HashMap<JobId, JobState>,
    history: HashMap<JobId, VecDeque<Execution>>,
    running: HashMap<String, Execution>,
    dirty: bool,
}

/// 任务状态管理：聚合计数、有界执行历史、持久化与崩溃恢复
pub struct JobStateManager {
    inner: Mutex<StateInner>,
    store: Option<Arc<dyn StateStore>>,
    memory_probe: Arc<dyn MemoryProbe>,
    events: EventBus,
    history_size: usize,
    persist_interval: Duration,
    persist_task: StdMutex<Option<JoinHandle<()>>>,
}

impl JobStateManager {
    pub fn new(config: &StateConfig, store: Option<Arc<dyn StateStore>>, events: EventBus) -> Self {
        Self {
            inner: Mutex::new(StateInner::default()),
            store,
            memory_probe: Arc::new(ProcessMemoryProbe),
            events,
            history_size: config.history_size.max(1),
            persist_interval: config.persist_interval(),
            persist_task: StdMutex::new(None),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// 为任务创建聚合状态；已从快照恢复的状态保留计数
    pub async fn register_job(
        &self,
        job_id: &str,
        name: &str,
        enabled: bool,
        next_run: Option<DateTime<Utc>>,
    ) {
        let mut inner = self.inner.lock().await;
        let state = inner
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| JobState::new(job_id, name));
        state.name = name.to_string();
        state.enabled = enabled;
        state.next_run = next_run;
        state.updated_at = Utc::now();
        inner.history.entry(job_id.to_string()).or_default();
        inner.dirty = true;
    }

    pub async fn unregister_job(&self, job_id: &str) -> Option<JobState> {
        let mut inner = self.inner.lock().await;
        inner.history.remove(job_id);
        let removed = inner.jobs.remove(job_id);
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }

    /// 记录一次执行开始，返回新的执行ID
    pub async fn start_execution(&self, job_id: &str) -> String {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut execution = Execution::start(job_id, execution_id.clone());
        execution.start_memory = self.memory_probe.usage_bytes();

        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.jobs.get_mut(job_id) {
            state.execution_count += 1;
            state.last_execution = Some((&execution).into());
            state.updated_at = Utc::now();
        }
        inner.running.insert(execution_id.clone(), execution);
        inner.dirty = true;
        execution_id
    }

    /// running -> 终态。未知或已结束的执行返回 None
    pub async fn end_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
        retry_count: u32,
    ) -> Option<Execution> {
        if !status.is_terminal() {
            warn!(execution_id, "结束执行时传入了非终态状态，忽略");
            return None;
        }
        let end_memory = self.memory_probe.usage_bytes();

        let mut inner = self.inner.lock().await;
        let mut execution = inner.running.remove(execution_id)?;

        let now = Utc::now();
        execution.status = status;
        execution.end_time = Some(now);
        execution.duration_ms = Some((now - execution.start_time).num_milliseconds().max(0) as u64);
        execution.retry_count = retry_count;
        execution.error = error;
        execution.memory = end_memory.map(|rss| MemorySnapshot {
            rss_bytes: rss,
            delta_bytes: execution
                .start_memory
                .map(|start| rss as i64 - start as i64)
                .unwrap_or_default(),
        });

        if let Some(state) = inner.jobs.get_mut(&execution.job_id) {
            state.record_terminal(&execution);
        }
        let history_size = self.history_size;
        if let Some(history) = inner.history.get_mut(&execution.job_id) {
            history.push_front(execution.clone());
            history.truncate(history_size);
        }
        inner.dirty = true;

        Some(execution)
    }

    pub async fn set_enabled(&self, job_id: &str, enabled: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.jobs.get_mut(job_id) {
            state.enabled = enabled;
            state.updated_at = Utc::now();
            inner.dirty = true;
        }
    }

    pub async fn set_next_run(&self, job_id: &str, next_run: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.jobs.get_mut(job_id) {
            state.next_run = next_run;
            inner.dirty = true;
        }
    }

    pub async fn get_state(&self, job_id: &str) -> Option<JobState> {
        self.inner.lock().await.jobs.get(job_id).cloned()
    }

    pub async fn get_all_states(&self) -> Vec<JobState> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }

    /// 最新的在前
    pub async fn get_history(&self, job_id: &str, limit: usize) -> Vec<Execution> {
        self.inner
            .lock()
            .await
            .history
            .get(job_id)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get_metrics(&self, job_id: &str) -> Option<JobMetrics> {
        self.inner
            .lock()
            .await
            .jobs
            .get(job_id)
            .map(JobState::metrics)
    }

    pub async fn running_executions(&self) -> Vec<Execution> {
        self.inner.lock().await.running.values().cloned().collect()
    }

    pub async fn is_dirty(&self) -> bool {
        self.inner.lock().await.dirty
    }

    async fn snapshot(&self) -> StateSnapshot {
        let mut inner = self.inner.lock().await;
        inner.dirty = false;
        StateSnapshot {
            version: StateSnapshot::CURRENT_VERSION,
            timestamp: Utc::now(),
            hostname: local_hostname(),
            pid: std::process::id(),
            jobs: inner.jobs.clone(),
            running_executions: inner
                .running
                .values()
                .map(|execution| RunningExecutionRecord {
                    execution_id: execution.execution_id.clone(),
                    job_id: execution.job_id.clone(),
                    started_at: execution.start_time,
                })
                .collect(),
        }
    }

    /// 立即写入快照。写入失败只记录日志，返回是否成功
    pub async fn persist_state(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let snapshot = self.snapshot().await;
        match store.save(&snapshot).await {
            Ok(()) => {
                debug!(jobs = snapshot.jobs.len(), "任务状态已持久化");
                self.events.publish(SchedulerEvent::StatePersisted {
                    jobs: snapshot.jobs.len(),
                });
                true
            }
            Err(e) => {
                error!("持久化任务状态失败: {e}");
                self.inner.lock().await.dirty = true;
                false
            }
        }
    }

    /// 启动时恢复状态，返回快照中记录为运行中、但当前并未运行的执行
    pub async fn load_state(&self) -> Vec<RunningExecutionRecord> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("没有找到历史状态快照，从空状态启动");
                return Vec::new();
            }
            Err(e) => {
                error!("加载任务状态失败，从空状态启动: {e}");
                return Vec::new();
            }
        };

        let crashed = {
            let mut inner = self.inner.lock().await;
            for (job_id, recovered) in snapshot.jobs {
                match inner.jobs.get_mut(&job_id) {
                    // 已经重新注册的任务保留当前的启用状态和下次执行时间
                    Some(current) => {
                        current.execution_count = recovered.execution_count;
                        current.success_count = recovered.success_count;
                        current.failure_count = recovered.failure_count;
                        current.consecutive_failures = recovered.consecutive_failures;
                        current.average_duration_ms = recovered.average_duration_ms;
                        current.last_execution = recovered.last_execution;
                    }
                    None => {
                        inner.jobs.insert(job_id, recovered);
                    }
                }
            }
            let crashed: Vec<RunningExecutionRecord> = snapshot
                .running_executions
                .into_iter()
                .filter(|record| !inner.running.contains_key(&record.execution_id))
                .collect();
            crashed
        };

        info!(
            hostname = %snapshot.hostname,
            pid = snapshot.pid,
            saved_at = %snapshot.timestamp,
            "已从快照恢复任务状态"
        );
        if !crashed.is_empty() {
            warn!(
                count = crashed.len(),
                "发现上次运行时未完成的执行，可能因进程崩溃中断"
            );
            self.events.publish(SchedulerEvent::JobsCrashed {
                executions: crashed.clone(),
            });
        }
        crashed
    }

    /// 启动定期持久化，只在状态有变化时写入
    pub fn start(self: &Arc<Self>) {
        if self.store.is_none() {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.persist_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if manager.is_dirty().await {
                    manager.persist_state().await;
                }
            }
        });
        if let Ok(mut task) = self.persist_task.lock() {
            if let Some(old) = task.replace(handle) {
                old.abort();
            }
        }
    }

    /// 停止定期持久化并做最后一次写入
    pub async fn shutdown(&self) {
        let handle = self.persist_task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            handle.abort();
        }
        if self.store.is_some() {
            self.persist_state().await;
        }
        info!("状态管理器已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::InMemoryStateStore;

    fn config(history_size: usize) -> StateConfig {
        StateConfig {
            history_size,
            persist_interval_ms: 20,
            ..Default::default()
        }
    }

    fn manager(store: Option<Arc<dyn StateStore>>) -> JobStateManager {
        JobStateManager::new(&config(3), store, EventBus::new())
    }

    #[tokio::test]
    async fn test_execution_lifecycle_updates_counters() {
        let manager = manager(None);
        manager.register_job("job-1", "job", true, None).await;

        let first = manager.start_execution("job-1").await;
        assert_eq!(manager.running_executions().await.len(), 1);
        let ended = manager
            .end_execution(&first, ExecutionStatus::Failed, Some("boom".into()), 2)
            .await
            .unwrap();
        assert_eq!(ended.status, ExecutionStatus::Failed);
        assert_eq!(ended.retry_count, 2);
        assert!(ended.duration_ms.is_some());

        let second = manager.start_execution("job-1").await;
        manager
            .end_execution(&second, ExecutionStatus::Completed, None, 0)
            .await;

        let state = manager.get_state("job-1").await.unwrap();
        assert_eq!(state.execution_count, 2);
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.consecutive_failures, 0);
        assert!(manager.running_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_end_unknown_or_finished_execution_is_noop() {
        let manager = manager(None);
        manager.register_job("job-1", "job", true, None).await;
        assert!(manager
            .end_execution("missing", ExecutionStatus::Completed, None, 0)
            .await
            .is_none());

        let id = manager.start_execution("job-1").await;
        assert!(manager
            .end_execution(&id, ExecutionStatus::Running, None, 0)
            .await
            .is_none());
        assert!(manager
            .end_execution(&id, ExecutionStatus::Completed, None, 0)
            .await
            .is_some());
        assert!(manager
            .end_execution(&id, ExecutionStatus::Failed, None, 0)
            .await
            .is_none());
        assert_eq!(manager.get_state("job-1").await.unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_history_is_bounded_newest_first() {
        let manager = manager(None);
        manager.register_job("job-1", "job", true, None).await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = manager.start_execution("job-1").await;
            manager
                .end_execution(&id, ExecutionStatus::Completed, None, 0)
                .await;
            ids.push(id);
        }

        let history = manager.get_history("job-1", 10).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].execution_id, ids[4]);
        assert_eq!(history[2].execution_id, ids[2]);
        assert_eq!(manager.get_history("job-1", 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_derived_from_aggregate() {
        let manager = manager(None);
        manager.register_job("job-1", "job", true, None).await;
        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::Completed,
            ExecutionStatus::Timeout,
            ExecutionStatus::Completed,
        ] {
            let id = manager.start_execution("job-1").await;
            manager.end_execution(&id, status, None, 0).await;
        }

        let metrics = manager.get_metrics("job-1").await.unwrap();
        assert_eq!(metrics.total_executions, 4);
        assert_eq!(metrics.success_rate, 0.75);
        assert_eq!(metrics.failure_rate, 0.25);
        assert_eq!(metrics.recent_failures, 0);
        assert!(manager.get_metrics("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_removes_state_and_history() {
        let manager = manager(None);
        manager.register_job("job-1", "job", true, None).await;
        assert!(manager.unregister_job("job-1").await.is_some());
        assert!(manager.get_state("job-1").await.is_none());
        assert!(manager.get_history("job-1", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_recover_with_crash_notice() {
        let store = InMemoryStateStore::new();
        let first = manager(Some(Arc::new(store.clone())));
        first.register_job("job-1", "job", true, None).await;
        let done = first.start_execution("job-1").await;
        first
            .end_execution(&done, ExecutionStatus::Completed, None, 0)
            .await;
        let in_flight = first.start_execution("job-1").await;
        assert!(first.persist_state().await);
        assert!(!first.is_dirty().await);

        let events = EventBus::new();
        let mut rx = events.subscribe();
        let second = JobStateManager::new(&config(3), Some(Arc::new(store)), events);
        let crashed = second.load_state().await;

        assert_eq!(crashed.len(), 1);
        assert_eq!(crashed[0].execution_id, in_flight);
        let state = second.get_state("job-1").await.unwrap();
        assert_eq!(state.execution_count, 2);
        assert_eq!(state.success_count, 1);

        match rx.recv().await.unwrap() {
            SchedulerEvent::JobsCrashed { executions } => assert_eq!(executions.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registration_after_recovery_keeps_counters() {
        let store = InMemoryStateStore::new();
        let first = manager(Some(Arc::new(store.clone())));
        first.register_job("job-1", "job", true, None).await;
        let id = first.start_execution("job-1").await;
        first
            .end_execution(&id, ExecutionStatus::Failed, None, 0)
            .await;
        first.persist_state().await;

        let second = manager(Some(Arc::new(store)));
        second.load_state().await;
        second.register_job("job-1", "renamed", false, None).await;

        let state = second.get_state("job-1").await.unwrap();
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.name, "renamed");
        assert!(!state.enabled);
    }

    #[tokio::test]
    async fn test_write_errors_are_swallowed() {
        let store = InMemoryStateStore::new();
        store.set_fail_writes(true);
        let manager = manager(Some(Arc::new(store.clone())));
        manager.register_job("job-1", "job", true, None).await;

        assert!(!manager.persist_state().await);
        // 失败后保持 dirty，下次周期重试
        assert!(manager.is_dirty().await);
    }

    #[tokio::test]
    async fn test_periodic_persistence_only_when_dirty() {
        let store = InMemoryStateStore::new();
        let manager = Arc::new(manager(Some(Arc::new(store.clone()))));
        manager.register_job("job-1", "job", true, None).await;
        manager.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.save_count(), 1);

        manager.set_enabled("job-1", false).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.save_count(), 2);

        manager.shutdown().await;
        assert_eq!(store.save_count(), 3);
        assert!(!store.snapshot().unwrap().jobs["job-1"].enabled);
    }

    #[tokio::test]
    async fn test_load_without_snapshot() {
        let manager = manager(Some(Arc::new(InMemoryStateStore::new())));
        assert!(manager.load_state().await.is_empty());
        assert!(manager.get_all_states().await.is_empty());
    }
}
