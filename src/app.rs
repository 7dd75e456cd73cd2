use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use scheduler_config::{AppConfig, JobDefinition};
use scheduler_core::{JobOptions, Schedule};
use scheduler_dispatcher::JobScheduler;
use scheduler_executor::{ShellCommand, ShellHandler};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 主应用程序：装配调度器并注册配置文件中声明的任务
pub struct Application {
    config: AppConfig,
    scheduler: JobScheduler,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            strategy = ?config.leader_election.strategy,
            jobs = config.jobs.len(),
            "初始化应用程序"
        );

        let scheduler = JobScheduler::from_config(&config)
            .await
            .context("创建任务调度器失败")?;

        let app = Self { config, scheduler };
        app.register_configured_jobs().await;
        Ok(app)
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// 配置错误的任务只记录日志并跳过，不影响其他任务
    async fn register_configured_jobs(&self) -> usize {
        let mut registered = 0;
        for definition in &self.config.jobs {
            let (schedule, options) = match job_from_definition(definition) {
                Ok(parts) => parts,
                Err(e) => {
                    error!(job = %definition.name, "任务配置无效: {e:#}");
                    continue;
                }
            };

            let handler = Arc::new(ShellHandler::new(ShellCommand::from(definition)));
            match self
                .scheduler
                .register_job(&definition.name, schedule, handler, options)
                .await
            {
                Ok(job_id) => {
                    info!(job_id = %job_id, command = %definition.command, "已注册配置任务");
                    registered += 1;
                }
                Err(e) => warn!(job = %definition.name, "注册配置任务失败: {e}"),
            }
        }
        info!("配置任务注册完成: {}/{}", registered, self.config.jobs.len());
        registered
    }

    /// 运行应用直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.scheduler.start().await.context("启动任务调度器失败")?;
        info!(instance_id = %self.scheduler.instance_id(), "任务调度器已启动");

        let _ = shutdown_rx.recv().await;
        info!("收到关闭信号，停止任务调度器");

        self.scheduler
            .shutdown()
            .await
            .context("关闭任务调度器失败")?;
        Ok(())
    }
}

/// 把配置文件中的任务声明转换为调度计划和任务选项
pub fn job_from_definition(definition: &JobDefinition) -> Result<(Schedule, JobOptions)> {
    definition.validate()?;

    let schedule = if let Some(expression) = &definition.cron {
        Schedule::cron(expression.clone())
    } else if let Some(interval_ms) = definition.interval_ms {
        Schedule::every(Duration::from_millis(interval_ms))
    } else if let Some(at) = &definition.at {
        let at = DateTime::parse_from_rfc3339(at)
            .with_context(|| format!("无效的执行时间: {at}"))?;
        Schedule::at(at.with_timezone(&Utc))
    } else {
        return Err(anyhow!("任务 {} 未配置调度计划", definition.name));
    };

    let defaults = JobOptions::default();
    let options = JobOptions {
        enabled: definition.enabled.unwrap_or(defaults.enabled),
        priority: definition.priority.unwrap_or(defaults.priority),
        timezone: definition.timezone.clone(),
        max_concurrent: definition.max_concurrent.unwrap_or(defaults.max_concurrent),
        timeout: definition.timeout_ms.map(Duration::from_millis),
        max_retries: definition.max_retries,
        ..defaults
    };
    Ok((schedule, options))
}
