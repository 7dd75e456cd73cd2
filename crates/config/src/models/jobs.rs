use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 配置文件中声明的 Shell 任务
///
/// `cron`、`interval_ms`、`at` 三者必须且只能设置一个。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefinition {
    pub name: String,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub interval_ms: Option<u64>,
    /// RFC 3339 时间
    pub at: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub max_concurrent: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub env: HashMap<String, String>,
}

impl JobDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("任务名称不能为空"));
        }
        if self.command.trim().is_empty() {
            return Err(anyhow::anyhow!("任务 {} 的命令不能为空", self.name));
        }
        let schedules = [
            self.cron.is_some(),
            self.interval_ms.is_some(),
            self.at.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if schedules != 1 {
            return Err(anyhow::anyhow!(
                "任务 {} 必须且只能配置 cron、interval_ms、at 其中之一",
                self.name
            ));
        }
        if self.max_concurrent == Some(0) {
            return Err(anyhow::anyhow!("任务 {} 的最大并发数必须大于0", self.name));
        }
        Ok(())
    }
}
