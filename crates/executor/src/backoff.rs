use std::time::Duration;

use scheduler_config::ExecutorConfig;
use scheduler_core::{BackoffStrategy, ExecutionOverrides};

/// 重试退避策略
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// 基础重试间隔
    pub base_delay: Duration,
    /// 指数退避倍数
    pub multiplier: f64,
    /// 最大重试间隔
    pub max_delay: Duration,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &ExecutorConfig, overrides: &ExecutionOverrides) -> Self {
        Self {
            strategy: overrides.backoff.unwrap_or(config.backoff),
            base_delay: overrides.retry_delay.unwrap_or_else(|| config.retry_delay()),
            multiplier: overrides
                .backoff_multiplier
                .unwrap_or(config.backoff_multiplier),
            max_delay: overrides
                .max_retry_delay
                .unwrap_or_else(|| config.max_retry_delay()),
            jitter_factor: config.jitter_factor,
        }
    }

    /// 第 `attempt` 次失败后的基础延迟（从1开始），已按最大间隔截断
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Exponential => {
                base_ms * self.multiplier.powi(attempt as i32 - 1)
            }
            BackoffStrategy::Linear => base_ms * attempt as f64,
        };
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// 加入随机抖动后的延迟
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 取值 [-1, 1)
        let unit = (rand::random::<f64>() - 0.5) * 2.0;
        self.jittered(attempt, unit)
    }

    fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let delay_ms = self.base_delay_for(attempt).as_millis() as f64;
        let jitter = delay_ms * self.jitter_factor * unit;
        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> BackoffPolicy {
        BackoffPolicy {
            strategy,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter_factor: 0.2,
        }
    }

    #[test]
    fn test_exponential_base_delays() {
        let policy = policy(BackoffStrategy::Exponential);
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(800));
        // 超过上限后截断
        assert_eq!(policy.base_delay_for(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_linear_base_delays() {
        let policy = policy(BackoffStrategy::Linear);
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_extremes() {
        let policy = policy(BackoffStrategy::Exponential);
        assert_eq!(policy.jittered(2, -1.0), Duration::from_millis(160));
        assert_eq!(policy.jittered(2, 1.0), Duration::from_millis(240));
        assert_eq!(policy.jittered(2, 0.0), Duration::from_millis(200));
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let policy = policy(BackoffStrategy::Exponential);
        for attempt in 1..=10u32 {
            let expected = (100.0 * 2f64.powi(attempt as i32 - 1)).min(10_000.0);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt).as_millis() as f64;
                assert!(delay >= (0.8 * expected).floor(), "attempt {attempt}: {delay}");
                assert!(delay <= 1.2 * expected, "attempt {attempt}: {delay}");
            }
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = ExecutorConfig::default();
        let overrides = ExecutionOverrides {
            retry_delay: Some(Duration::from_millis(10)),
            backoff: Some(BackoffStrategy::Linear),
            ..Default::default()
        };
        let policy = BackoffPolicy::from_config(&config, &overrides);
        assert_eq!(policy.strategy, BackoffStrategy::Linear);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, config.max_retry_delay());
    }
}
