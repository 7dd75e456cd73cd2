use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// 日志与指标输出
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_listen_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_listen_address: "0.0.0.0:9090".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            LOG_LEVELS.contains(&self.log_level.as_str()),
            "未知的日志级别 {}，可选: {}",
            self.log_level,
            LOG_LEVELS.join("/")
        );
        if self.metrics_enabled {
            self.metrics_listen_address
                .parse::<std::net::SocketAddr>()
                .map_err(|e| {
                    anyhow::anyhow!("指标监听地址 {} 无效: {e}", self.metrics_listen_address)
                })?;
        }
        Ok(())
    }
}
