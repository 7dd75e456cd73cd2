use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use metrics::gauge;
use scheduler_config::LeaderElectionConfig;
use scheduler_core::{EventBus, LeaderInfo, LockBackend, SchedulerEvent, SchedulerResult};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 副本编号环境变量，非0的副本永远不参与选主
pub const REPLICA_INDEX_ENV: &str = "SCHEDULER_REPLICA_INDEX";

fn replica_may_participate() -> bool {
    match std::env::var(REPLICA_INDEX_ENV) {
        Ok(value) => value.trim().parse::<u32>().map(|i| i == 0).unwrap_or(false),
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Heartbeat,
    Verify,
}

/// 基于共享锁记录的选主
///
/// 没有锁后端（`none` 策略）时实例启动即为主。否则通过 [`LockBackend`]
/// 的原子写入竞争，主节点定期刷新心跳，并定期回读锁记录确认仍归自己所有。
pub struct LeaderElection {
    config: LeaderElectionConfig,
    instance_id: String,
    backend: Option<Arc<dyn LockBackend>>,
    participate: bool,
    is_leader: AtomicBool,
    leadership: watch::Sender<bool>,
    events: EventBus,
    info: StdMutex<LeaderInfo>,
    // 串行化获取/心跳/校验/让出，避免状态交错
    transition: Mutex<()>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl LeaderElection {
    pub fn new(
        config: LeaderElectionConfig,
        instance_id: impl Into<String>,
        backend: Option<Arc<dyn LockBackend>>,
        events: EventBus,
    ) -> Self {
        let instance_id = instance_id.into();
        let participate = config.participate && replica_may_participate();
        let (leadership, _) = watch::channel(false);
        let mut info = LeaderInfo::new(instance_id.clone());
        if let Some(backend) = &backend {
            info = info.with_metadata("backend", backend.name());
        }

        Self {
            config,
            instance_id,
            backend,
            participate,
            is_leader: AtomicBool::new(false),
            leadership,
            events,
            info: StdMutex::new(info),
            transition: Mutex::new(()),
            tasks: StdMutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn participates(&self) -> bool {
        self.participate
    }

    /// 订阅领导权变化，当前值即是否为主
    pub fn watch_leadership(&self) -> watch::Receiver<bool> {
        self.leadership.subscribe()
    }

    /// 读取当前锁记录
    pub async fn get_leader_info(&self) -> SchedulerResult<Option<LeaderInfo>> {
        match &self.backend {
            Some(backend) => backend.read().await,
            None => Ok(self.is_leader().then(|| self.current_info())),
        }
    }

    pub fn start(self: &Arc<Self>) {
        if self.backend.is_none() {
            info!(instance_id = %self.instance_id, "未配置选主后端，单实例模式直接成为主节点");
            self.promote(self.fresh_info());
            return;
        }
        if !self.participate {
            info!(instance_id = %self.instance_id, "当前实例不参与选主，保持从节点");
            return;
        }

        info!(
            instance_id = %self.instance_id,
            lock_timeout_ms = self.config.lock_timeout_ms,
            "启动选主"
        );

        let heartbeat = self.spawn_loop(LoopKind::Heartbeat);
        let verify = self.spawn_loop(LoopKind::Verify);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(heartbeat);
            tasks.push(verify);
        }
    }

    fn spawn_loop(self: &Arc<Self>, kind: LoopKind) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = match kind {
            LoopKind::Heartbeat => self.config.heartbeat_interval(),
            LoopKind::Verify => self.config.verify_interval(),
        };
        tokio::spawn(async move {
            // 心跳循环启动时立即竞选一次
            let mut first = kind == LoopKind::Heartbeat;
            loop {
                if !first {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                first = false;
                let Some(election) = weak.upgrade() else {
                    break;
                };
                match kind {
                    LoopKind::Heartbeat if election.is_leader() => election.heartbeat().await,
                    LoopKind::Heartbeat => {
                        election.try_become_leader().await;
                    }
                    LoopKind::Verify => election.verify().await,
                }
            }
        })
    }

    /// 尝试成为主节点，返回当前是否为主
    pub async fn try_become_leader(&self) -> bool {
        let Some(backend) = self.backend.clone() else {
            return self.is_leader();
        };
        let _guard = self.transition.lock().await;
        if self.is_leader() {
            return true;
        }

        let ttl = self.config.lock_timeout();
        let candidate = self.fresh_info();

        match backend.try_acquire(&candidate, ttl).await {
            Ok(true) => {
                self.promote(candidate);
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(instance_id = %self.instance_id, "获取领导者锁失败: {e}");
                return false;
            }
        }

        let current = match backend.read().await {
            Ok(current) => current,
            Err(e) => {
                warn!(instance_id = %self.instance_id, "读取领导者锁失败: {e}");
                return false;
            }
        };

        let take_over = match &current {
            Some(holder) if holder.instance_id == self.instance_id => {
                info!("锁记录属于本实例，重新接管");
                true
            }
            Some(holder) if holder.is_stale(Utc::now(), ttl) => {
                warn!(
                    holder = %holder.instance_id,
                    age_ms = holder.age(Utc::now()).as_millis() as u64,
                    "领导者心跳已过期，接管锁"
                );
                true
            }
            Some(holder) => {
                debug!(holder = %holder.instance_id, "锁由其他实例持有，保持从节点");
                false
            }
            // 锁在两次操作之间被释放，或者记录已损坏
            None => match backend.try_acquire(&candidate, ttl).await {
                Ok(true) => {
                    self.promote(candidate);
                    return true;
                }
                Ok(false) => {
                    warn!("锁记录无法解析，覆盖写入");
                    true
                }
                Err(e) => {
                    warn!("获取领导者锁失败: {e}");
                    false
                }
            },
        };

        if !take_over {
            return false;
        }
        match backend.force_acquire(&candidate, ttl).await {
            Ok(()) => {
                self.promote(candidate);
                true
            }
            Err(e) => {
                error!(instance_id = %self.instance_id, "接管领导者锁失败: {e}");
                false
            }
        }
    }

    /// 刷新心跳；失败即视为失去领导权，让出后立即重新竞选
    pub async fn heartbeat(&self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let guard = self.transition.lock().await;
        if !self.is_leader() {
            return;
        }

        let mut info = self.current_info();
        info.heartbeat(Utc::now());

        match backend.renew(&info, self.config.lock_timeout()).await {
            Ok(true) => {
                self.set_info(info);
                debug!(instance_id = %self.instance_id, "领导者心跳已刷新");
                self.events.publish(SchedulerEvent::LeaderHeartbeat {
                    instance_id: self.instance_id.clone(),
                });
                return;
            }
            Ok(false) => {
                warn!(instance_id = %self.instance_id, "心跳刷新失败：锁已不属于本实例");
                self.step_down_locked(backend.as_ref(), "锁已被其他实例持有")
                    .await;
            }
            Err(e) => {
                error!(instance_id = %self.instance_id, "心跳刷新失败: {e}");
                self.events.publish(SchedulerEvent::LeaderUnhealthy {
                    instance_id: self.instance_id.clone(),
                    error: e.to_string(),
                });
                self.step_down_locked(backend.as_ref(), "心跳刷新失败")
                    .await;
            }
        }
        drop(guard);

        self.try_become_leader().await;
    }

    /// 回读锁记录，确认仍由本实例持有
    pub async fn verify(&self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let _guard = self.transition.lock().await;
        if !self.is_leader() {
            return;
        }

        let reason = match backend.read().await {
            Ok(Some(holder)) if holder.instance_id == self.instance_id => return,
            Ok(Some(holder)) => format!("锁已被实例 {} 持有", holder.instance_id),
            Ok(None) => "锁记录已丢失".to_string(),
            Err(e) => format!("校验领导者锁失败: {e}"),
        };
        warn!(instance_id = %self.instance_id, "领导权校验未通过: {reason}");
        self.step_down_locked(backend.as_ref(), &reason).await;
    }

    /// 管理操作：主动让出领导权
    pub async fn force_step_down(&self) {
        self.step_down("强制让出领导权").await;
    }

    pub async fn step_down(&self, reason: &str) {
        let _guard = self.transition.lock().await;
        match self.backend.clone() {
            Some(backend) => self.step_down_locked(backend.as_ref(), reason).await,
            None => self.demote(reason),
        }
    }

    async fn step_down_locked(&self, backend: &dyn LockBackend, reason: &str) {
        if !self.is_leader() {
            return;
        }
        self.demote(reason);
        if let Err(e) = backend.release(&self.instance_id).await {
            debug!(instance_id = %self.instance_id, "释放领导者锁失败（忽略）: {e}");
        }
    }

    /// 停止心跳和校验循环但不释放锁，锁记录会随超时过期
    pub fn stop_heartbeat(&self) {
        self.cancel.cancel();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    pub async fn shutdown(&self) {
        self.stop_heartbeat();
        self.step_down("调度器关闭").await;
        info!(instance_id = %self.instance_id, "选主已停止");
    }

    fn promote(&self, info: LeaderInfo) {
        self.set_info(info);
        self.is_leader.store(true, Ordering::SeqCst);
        self.leadership.send_replace(true);
        gauge!("scheduler_is_leader").set(1.0);
        info!(instance_id = %self.instance_id, "成为主节点");
        self.events.publish(SchedulerEvent::LeaderElected {
            instance_id: self.instance_id.clone(),
        });
    }

    fn demote(&self, reason: &str) {
        if !self.is_leader.swap(false, Ordering::SeqCst) {
            return;
        }
        self.leadership.send_replace(false);
        gauge!("scheduler_is_leader").set(0.0);
        warn!(instance_id = %self.instance_id, reason, "让出领导权");
        self.events.publish(SchedulerEvent::LeaderStepdown {
            instance_id: self.instance_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn fresh_info(&self) -> LeaderInfo {
        let mut info = self.current_info();
        let now = Utc::now();
        info.elected_at = now;
        info.last_heartbeat = now;
        info
    }

    fn current_info(&self) -> LeaderInfo {
        self.info
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_info(&self, info: LeaderInfo) {
        *self
            .info
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = info;
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
