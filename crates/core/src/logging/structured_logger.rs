use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::logging::log_level::LogLevel;

/// 调度器使用的日志接口：带级别、组件名和结构化元数据
pub trait SchedulerLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, component: &str, metadata: &Value);

    fn debug(&self, message: &str, component: &str, metadata: &Value) {
        self.log(LogLevel::Debug, message, component, metadata);
    }

    fn info(&self, message: &str, component: &str, metadata: &Value) {
        self.log(LogLevel::Info, message, component, metadata);
    }

    fn warn(&self, message: &str, component: &str, metadata: &Value) {
        self.log(LogLevel::Warn, message, component, metadata);
    }

    fn error(&self, message: &str, component: &str, metadata: &Value) {
        self.log(LogLevel::Error, message, component, metadata);
    }
}

/// 默认实现，转发到 `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl SchedulerLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, component: &str, metadata: &Value) {
        if tracing::level_filters::LevelFilter::current() < level.to_tracing() {
            return;
        }
        match level {
            LogLevel::Debug => tracing::debug!(component, %metadata, "{message}"),
            LogLevel::Info => tracing::info!(component, %metadata, "{message}"),
            LogLevel::Warn => tracing::warn!(component, %metadata, "{message}"),
            LogLevel::Error => tracing::error!(component, %metadata, "{message}"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub metadata: Value,
}

/// 把日志保存在内存中，测试时用来断言
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }
}

impl SchedulerLogger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str, component: &str, metadata: &Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                timestamp: Utc::now(),
                level,
                component: component.to_string(),
                message: message.to_string(),
                metadata: metadata.clone(),
            });
        }
    }
}
