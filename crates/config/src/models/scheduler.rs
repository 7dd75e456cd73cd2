use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 全局并发执行上限
    pub max_concurrent_jobs: usize,
    /// 关闭时等待运行中任务完成的最长时间
    pub graceful_shutdown_timeout_ms: u64,
    /// 实例ID，为空时自动生成
    pub instance_id: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            graceful_shutdown_timeout_ms: 30_000,
            instance_id: None,
        }
    }
}

impl SchedulerConfig {
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("全局最大并发任务数必须大于0"));
        }
        if let Some(id) = &self.instance_id {
            if id.trim().is_empty() {
                return Err(anyhow::anyhow!("实例ID不能为空字符串"));
            }
        }
        Ok(())
    }
}
