use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{
    executor::ExecutorConfig, jobs::JobDefinition, leader_election::LeaderElectionConfig,
    observability::ObservabilityConfig, resilience::CircuitBreakerConfig,
    scheduler::SchedulerConfig, state::StateConfig,
};
use crate::{DEFAULT_CONFIG_PATHS, ENV_PREFIX};

/// 调度进程的完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub state: StateConfig,
    pub leader_election: LeaderElectionConfig,
    pub observability: ObservabilityConfig,
    pub jobs: Vec<JobDefinition>,
}

impl AppConfig {
    /// 合并默认值、TOML 文件和 `SCHEDULER_` 前缀的环境变量（嵌套键用 `__` 分隔）
    ///
    /// 显式给出的路径必须存在；未给出时依次探测默认位置，找不到文件不算错误。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();
        if let Some(path) = Self::resolve_file(config_path)? {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    fn resolve_file(explicit: Option<&str>) -> Result<Option<&str>> {
        match explicit {
            Some(path) if Path::new(path).exists() => Ok(Some(path)),
            Some(path) => Err(anyhow::anyhow!("配置文件不存在: {path}")),
            None => Ok(DEFAULT_CONFIG_PATHS
                .iter()
                .copied()
                .find(|path| Path::new(path).exists())),
        }
    }

    /// 主要供测试使用，同样会做校验
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 各段配置逐一校验，并要求任务名称唯一
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.executor.validate().context("执行器配置验证失败")?;
        self.circuit_breaker
            .validate()
            .context("熔断器配置验证失败")?;
        self.state.validate().context("状态持久化配置验证失败")?;
        self.leader_election
            .validate()
            .context("选主配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate().context("任务定义验证失败")?;
            if !names.insert(job.name.as_str()) {
                return Err(anyhow::anyhow!("任务名称重复: {}", job.name));
            }
        }

        Ok(())
    }
}
