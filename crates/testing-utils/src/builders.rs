//! 测试用配置：短超时、小延迟

use scheduler_config::{
    AppConfig, CircuitBreakerConfig, ExecutorConfig, LeaderElectionConfig, LeaderStrategy,
    SchedulerConfig, StateConfig,
};

pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        default_timeout_ms: 2_000,
        max_retries: 0,
        retry_delay_ms: 5,
        max_retry_delay_ms: 50,
        shutdown_grace_period_ms: 500,
        ..Default::default()
    }
}

pub fn fast_leader_config(strategy: LeaderStrategy) -> LeaderElectionConfig {
    LeaderElectionConfig {
        strategy,
        lock_timeout_ms: 300,
        heartbeat_interval_ms: Some(100),
        verify_interval_ms: Some(150),
        ..Default::default()
    }
}

pub struct TestConfigBuilder {
    config: AppConfig,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig {
                scheduler: SchedulerConfig {
                    graceful_shutdown_timeout_ms: 1_000,
                    ..Default::default()
                },
                executor: fast_executor_config(),
                circuit_breaker: CircuitBreakerConfig {
                    enabled: false,
                    ..Default::default()
                },
                state: StateConfig {
                    enabled: false,
                    persist_interval_ms: 50,
                    ..Default::default()
                },
                leader_election: fast_leader_config(LeaderStrategy::None),
                ..Default::default()
            },
        }
    }

    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.scheduler.max_concurrent_jobs = max;
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.config.scheduler.instance_id = Some(id.into());
        self
    }

    pub fn leader_strategy(mut self, strategy: LeaderStrategy) -> Self {
        self.config.leader_election.strategy = strategy;
        self
    }

    pub fn lock_path(mut self, path: impl Into<String>) -> Self {
        self.config.leader_election.lock_path = path.into();
        self
    }

    pub fn circuit_breaker(mut self, failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        self.config.circuit_breaker = CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            reset_timeout_ms,
        };
        self
    }

    pub fn state_path(mut self, path: impl Into<String>) -> Self {
        self.config.state.enabled = true;
        self.config.state.path = path.into();
        self
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.config.state.history_size = size;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}
