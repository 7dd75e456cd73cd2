use std::sync::Arc;

use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

#[derive(Default)]
struct ShutdownState {
    /// 触发关闭后置空，之后的订阅者拿到的是已触发的接收器
    notifier: Option<broadcast::Sender<()>>,
    triggered: bool,
}

/// 进程级关闭协调：main 在收到信号后触发，Application 订阅后停止调度器
#[derive(Clone)]
pub struct ShutdownManager {
    state: Arc<Mutex<ShutdownState>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(4);
        Self {
            state: Arc::new(Mutex::new(ShutdownState {
                notifier: Some(notifier),
                triggered: false,
            })),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let state = self.state.lock().await;
        match state.notifier.as_ref() {
            Some(notifier) => notifier.subscribe(),
            None => fired_receiver(),
        }
    }

    /// 幂等
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.triggered {
            debug!("重复的关闭请求已忽略");
            return;
        }
        state.triggered = true;

        let Some(notifier) = state.notifier.take() else {
            return;
        };
        let delivered = notifier.send(()).unwrap_or(0);
        info!("已通知 {delivered} 个订阅者开始关闭");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.state.lock().await.triggered
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

fn fired_receiver() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);
    let _ = tx.send(());
    rx
}

/// 阻塞直到进程收到 Ctrl+C 或 SIGTERM。处理器安装失败时只记录日志，该路径永不完成
pub async fn wait_for_shutdown_signal() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                error!("无法监听Ctrl+C: {e}");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("无法监听SIGTERM: {e}");
                return std::future::pending().await;
            }
        };
        stream.recv().await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let name = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = name, "收到退出信号");
}
