use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 选主策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderStrategy {
    /// 单实例部署，始终为主
    #[default]
    None,
    /// 共享文件系统上的锁文件
    File,
    /// Redis SET NX PX
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderElectionConfig {
    pub strategy: LeaderStrategy,
    pub lock_path: String,
    pub redis_url: String,
    pub lock_key: String,
    /// 锁记录心跳超过该时长即视为过期
    pub lock_timeout_ms: u64,
    /// 默认 lock_timeout / 3
    pub heartbeat_interval_ms: Option<u64>,
    /// 默认 heartbeat_interval * 1.5
    pub verify_interval_ms: Option<u64>,
    /// 当前进程是否参与选主
    pub participate: bool,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            strategy: LeaderStrategy::None,
            lock_path: "data/scheduler.lock".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            lock_key: "job-scheduler:leader".to_string(),
            lock_timeout_ms: 30_000,
            heartbeat_interval_ms: None,
            verify_interval_ms: None,
            participate: true,
        }
    }
}

impl LeaderElectionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(
            self.heartbeat_interval_ms
                .unwrap_or(self.lock_timeout_ms / 3)
                .max(1),
        )
    }

    pub fn verify_interval(&self) -> Duration {
        match self.verify_interval_ms {
            Some(ms) => Duration::from_millis(ms.max(1)),
            None => self.heartbeat_interval().mul_f64(1.5),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(anyhow::anyhow!("锁超时时间必须大于0"));
        }
        if self.heartbeat_interval() >= self.lock_timeout() {
            return Err(anyhow::anyhow!("心跳间隔必须小于锁超时时间"));
        }
        match self.strategy {
            LeaderStrategy::File if self.lock_path.trim().is_empty() => {
                Err(anyhow::anyhow!("文件锁策略需要配置 lock_path"))
            }
            LeaderStrategy::Redis if !self.redis_url.starts_with("redis") => Err(
                anyhow::anyhow!("Redis地址格式无效: {}", self.redis_url),
            ),
            LeaderStrategy::Redis if self.lock_key.trim().is_empty() => {
                Err(anyhow::anyhow!("Redis锁策略需要配置 lock_key"))
            }
            _ => Ok(()),
        }
    }
}
