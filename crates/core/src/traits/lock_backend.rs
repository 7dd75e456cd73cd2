use std::time::Duration;

use async_trait::async_trait;

use crate::models::LeaderInfo;
use crate::SchedulerResult;

/// 领导者锁存储
///
/// 所有实现都必须保证 `try_acquire` 是原子的“不存在才写入”，这是整个集群唯一的互斥点。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// 原子地在锁不存在时写入 `info`，返回是否成功
    async fn try_acquire(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<bool>;

    /// 刷新心跳。锁已不属于 `info.instance_id` 时返回 false
    async fn renew(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<bool>;

    /// 读取当前锁记录
    async fn read(&self) -> SchedulerResult<Option<LeaderInfo>>;

    /// 仅当锁属于 `instance_id` 时删除
    async fn release(&self, instance_id: &str) -> SchedulerResult<()>;

    /// 无条件覆盖锁记录，用于接管过期的锁
    async fn force_acquire(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<()>;

    fn name(&self) -> &'static str;
}
