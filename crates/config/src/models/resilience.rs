use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 任务级熔断器：每个任务一个独立实例
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// 关闭时执行器不做熔断判断
    pub enabled: bool,
    /// 连续失败达到该次数后打开
    pub failure_threshold: u32,
    /// 打开状态持续多久后放行一次试探执行
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.failure_threshold > 0, "熔断失败阈值必须大于0");
        anyhow::ensure!(self.reset_timeout_ms > 0, "熔断恢复时间必须大于0");
        Ok(())
    }
}
