use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// 是否持久化任务状态
    pub enabled: bool,
    /// 状态快照文件路径
    pub path: String,
    pub persist_interval_ms: u64,
    /// 每个任务保留的执行历史条数
    pub history_size: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "data/scheduler-state.json".to_string(),
            persist_interval_ms: 5_000,
            history_size: 100,
        }
    }
}

impl StateConfig {
    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(anyhow::anyhow!("状态文件路径不能为空"));
        }
        if self.persist_interval_ms == 0 {
            return Err(anyhow::anyhow!("状态持久化间隔必须大于0"));
        }
        if self.history_size == 0 {
            return Err(anyhow::anyhow!("执行历史容量必须大于0"));
        }
        Ok(())
    }
}
