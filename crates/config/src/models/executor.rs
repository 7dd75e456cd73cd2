use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重试退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: BackoffStrategy,
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
    /// 内存保护阈值（MB），不设置则关闭内存检查
    pub memory_threshold_mb: Option<u64>,
    /// 关闭时等待活跃执行结束的宽限期
    pub shutdown_grace_period_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            backoff: BackoffStrategy::Exponential,
            backoff_multiplier: 2.0,
            max_retry_delay_ms: 60_000,
            jitter_factor: 0.2,
            memory_threshold_mb: None,
            shutdown_grace_period_ms: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    pub fn memory_threshold_bytes(&self) -> Option<u64> {
        self.memory_threshold_mb.map(|mb| mb * 1024 * 1024)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(anyhow::anyhow!("默认执行超时时间必须大于0"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!(
                "退避倍数不能小于1.0: {}",
                self.backoff_multiplier
            ));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动系数必须在0.0到1.0之间: {}",
                self.jitter_factor
            ));
        }
        if self.memory_threshold_mb == Some(0) {
            return Err(anyhow::anyhow!("内存阈值必须大于0"));
        }
        Ok(())
    }
}
