use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 领导者锁记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub instance_id: String,
    pub hostname: String,
    pub pid: u32,
    pub elected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl LeaderInfo {
    pub fn new(instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            hostname: crate::system::local_hostname(),
            pid: std::process::id(),
            elected_at: now,
            last_heartbeat: now,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 心跳距今的时长，时钟回拨时视为0
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }

    /// 心跳超过锁超时即为过期，可被其他实例接管
    pub fn is_stale(&self, now: DateTime<Utc>, lock_timeout: Duration) -> bool {
        self.age(now) >= lock_timeout
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
    }
}
