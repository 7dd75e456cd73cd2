//! 内存版的锁后端与状态存储

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scheduler_core::{LeaderInfo, LockBackend, StateSnapshot, StateStore};
use scheduler_errors::{SchedulerError, SchedulerResult};

#[derive(Debug)]
struct LockRecord {
    info: LeaderInfo,
    expires_at: Instant,
}

/// 进程内共享的锁后端，行为与 Redis 一致：记录在 TTL 到期后消失
///
/// Clone 出来的实例共享同一把锁，可以模拟多个调度器实例竞争。
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockBackend {
    record: Arc<Mutex<Option<LockRecord>>>,
    unavailable: Arc<AtomicBool>,
    operations: Arc<AtomicUsize>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟后端不可用，之后所有操作返回 LockBackend 错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn holder(&self) -> Option<String> {
        let record = self.record.lock().unwrap();
        record
            .as_ref()
            .filter(|r| r.expires_at > Instant::now())
            .map(|r| r.info.instance_id.clone())
    }

    /// 直接写入一条锁记录，用于构造过期或他人持有的场景
    pub fn seed(&self, info: LeaderInfo, ttl: Duration) {
        *self.record.lock().unwrap() = Some(LockRecord {
            info,
            expires_at: Instant::now() + ttl,
        });
    }

    fn check(&self) -> SchedulerResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::lock_error("锁后端不可用"));
        }
        Ok(())
    }

    fn live(record: &mut Option<LockRecord>) -> Option<&mut LockRecord> {
        if record
            .as_ref()
            .is_some_and(|r| r.expires_at <= Instant::now())
        {
            *record = None;
        }
        record.as_mut()
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_acquire(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<bool> {
        self.check()?;
        let mut record = self.record.lock().unwrap();
        if Self::live(&mut record).is_some() {
            return Ok(false);
        }
        *record = Some(LockRecord {
            info: info.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(true)
    }

    async fn renew(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<bool> {
        self.check()?;
        let mut record = self.record.lock().unwrap();
        match Self::live(&mut record) {
            Some(current) if current.info.instance_id == info.instance_id => {
                current.info = info.clone();
                current.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read(&self) -> SchedulerResult<Option<LeaderInfo>> {
        self.check()?;
        let mut record = self.record.lock().unwrap();
        Ok(Self::live(&mut record).map(|r| r.info.clone()))
    }

    async fn release(&self, instance_id: &str) -> SchedulerResult<()> {
        self.check()?;
        let mut record = self.record.lock().unwrap();
        if Self::live(&mut record).is_some_and(|r| r.info.instance_id == instance_id) {
            *record = None;
        }
        Ok(())
    }

    async fn force_acquire(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<()> {
        self.check()?;
        *self.record.lock().unwrap() = Some(LockRecord {
            info: info.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// 内存状态存储，Clone 出来的实例共享同一份快照
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    snapshot: Arc<Mutex<Option<StateSnapshot>>>,
    fail_writes: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        let store = Self::default();
        *store.snapshot.lock().unwrap() = Some(snapshot);
        store
    }

    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> SchedulerResult<Option<StateSnapshot>> {
        Ok(self.snapshot())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> SchedulerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SchedulerError::persistence_error("模拟写入失败"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}
