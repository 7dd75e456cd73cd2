use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use job_scheduler::{wait_for_shutdown_signal, Application, ShutdownManager};
use scheduler_config::{AppConfig, LogFormat};
use scheduler_infrastructure::{init_logging, init_metrics};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("job-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式后台任务调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，不指定时依次查找默认位置"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("instance-id")
                .long("instance-id")
                .value_name("ID")
                .help("实例ID，不指定时自动生成"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {config_path:?}"))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
    }
    if let Some(id) = matches.get_one::<String>("instance-id") {
        config.scheduler.instance_id = Some(id.clone());
    }
    config.validate().context("配置校验失败")?;

    init_logging(
        &config.observability.log_level,
        config.observability.log_format,
    )?;
    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_listen_address)?;
    }

    info!("启动分布式任务调度系统");

    // 等待正在执行的任务 + 强制取消后的宽限期，再留出持久化余量
    let shutdown_budget = config.scheduler.graceful_shutdown_timeout()
        + Duration::from_millis(config.executor.shutdown_grace_period_ms)
        + Duration::from_secs(5);

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_budget, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式任务调度系统已退出");
    Ok(())
}
