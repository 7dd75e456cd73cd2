use async_trait::async_trait;

use crate::models::StateSnapshot;
use crate::SchedulerResult;

/// 状态快照存储；快照不存在时 `load` 返回 `Ok(None)`
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> SchedulerResult<Option<StateSnapshot>>;

    async fn save(&self, snapshot: &StateSnapshot) -> SchedulerResult<()>;
}
