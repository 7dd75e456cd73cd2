use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use scheduler_config::LogFormat;
use tracing::info;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// 安装全局 tracing 订阅者。设置了 `RUST_LOG` 时以它为准，否则使用 `log_level`
pub fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("无法解析日志级别: {log_level}"))?,
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = match log_format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .context("全局日志订阅者已存在或初始化失败")
}

/// 安装 Prometheus 导出器，在 `listen_address` 上提供 /metrics
pub fn init_metrics(listen_address: &str) -> Result<()> {
    let addr: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen_address}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus指标导出器失败")?;

    info!("Prometheus指标导出器已启动: {addr}");
    Ok(())
}
