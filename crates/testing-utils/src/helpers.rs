//! 测试辅助函数

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use scheduler_core::JobContext;
use tokio::time::{interval, timeout};

pub struct TestEnv;

impl TestEnv {
    /// 每 10ms 检查一次条件，超时返回 false
    pub async fn wait_for<F, Fut>(mut condition: F, limit: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let poll = async {
            let mut ticker = interval(Duration::from_millis(10));
            loop {
                ticker.tick().await;
                if condition().await {
                    break;
                }
            }
        };
        timeout(limit, poll).await.is_ok()
    }
}

static EXECUTION_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn job_context(job_id: &str) -> JobContext {
    JobContext {
        job_id: job_id.to_string(),
        job_name: job_id.to_string(),
        execution_id: format!("{job_id}-exec-{}", EXECUTION_SEQ.fetch_add(1, Ordering::Relaxed)),
        attempt: 0,
        start_time: Utc::now(),
        metadata: HashMap::new(),
    }
}
