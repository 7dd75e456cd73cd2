pub mod file;
pub mod redis;

use std::sync::Arc;

use scheduler_config::{LeaderElectionConfig, LeaderStrategy};
use scheduler_core::{LockBackend, SchedulerResult};
use tracing::info;

pub use self::file::FileLockBackend;
pub use self::redis::RedisLockBackend;

/// 按配置创建锁后端；`none` 策略不需要锁，返回 None
pub async fn create_lock_backend(
    config: &LeaderElectionConfig,
) -> SchedulerResult<Option<Arc<dyn LockBackend>>> {
    match config.strategy {
        LeaderStrategy::None => Ok(None),
        LeaderStrategy::File => {
            info!(path = %config.lock_path, "使用文件锁进行领导者选举");
            Ok(Some(Arc::new(FileLockBackend::new(&config.lock_path))))
        }
        LeaderStrategy::Redis => {
            info!(key = %config.lock_key, "使用Redis锁进行领导者选举");
            let backend = RedisLockBackend::connect(&config.redis_url, &config.lock_key).await?;
            Ok(Some(Arc::new(backend)))
        }
    }
}
