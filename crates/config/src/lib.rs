pub mod models;


pub use models::{
    AppConfig, BackoffStrategy, CircuitBreakerConfig, ExecutorConfig, JobDefinition,
    LeaderElectionConfig, LeaderStrategy, LogFormat, ObservabilityConfig, SchedulerConfig,
    StateConfig,
};

/// 环境变量前缀，例如 `SCHEDULER_EXECUTOR__MAX_RETRIES=5`
pub const ENV_PREFIX: &str = "SCHEDULER";

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/scheduler.toml",
    "scheduler.toml",
    "/etc/job-scheduler/config.toml",
];
