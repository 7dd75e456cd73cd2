//! 测试用任务处理函数

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{JobContext, JobHandler};
use serde_json::{json, Value};

/// 记录调用次数，每次立即成功
#[derive(Debug, Clone, Default)]
pub struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn run(&self, context: JobContext) -> anyhow::Result<Value> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "job_id": context.job_id, "count": count }))
    }
}

/// 总是失败
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn run(&self, _context: JobContext) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// 前 `failures` 次失败，之后成功
#[derive(Debug, Clone)]
pub struct FlakyHandler {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn run(&self, context: JobContext) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("flaky failure #{} (attempt {})", call + 1, context.attempt);
        }
        Ok(json!({ "attempt": context.attempt }))
    }
}

/// 睡眠固定时长，同时记录同一时刻运行的最大并发数
#[derive(Debug, Clone)]
pub struct ConcurrencyProbe {
    delay: Duration,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for ConcurrencyProbe {
    async fn run(&self, _context: JobContext) -> anyhow::Result<Value> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}
