use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::circuit_breaker::CircuitState;
use crate::models::{ExecutionStatus, JobId, RunningExecutionRecord};

/// 事件通道容量，慢订阅者会丢失最旧的事件
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 调度器对外发布的通知，仅用于观测，不参与控制流
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    SchedulerStarted {
        instance_id: String,
    },
    SchedulerShutdown {
        instance_id: String,
        forced_cancellations: usize,
    },
    JobRegistered {
        job_id: JobId,
        name: String,
        next_run: Option<DateTime<Utc>>,
    },
    JobUnregistered {
        job_id: JobId,
    },
    JobEnabled {
        job_id: JobId,
        enabled: bool,
    },
    JobQueued {
        job_id: JobId,
        pending: usize,
    },
    JobStart {
        job_id: JobId,
        execution_id: String,
    },
    JobComplete {
        job_id: JobId,
        execution_id: String,
        duration_ms: u64,
    },
    JobError {
        job_id: JobId,
        execution_id: String,
        status: ExecutionStatus,
        error: Option<String>,
    },
    LeaderElected {
        instance_id: String,
    },
    LeaderStepdown {
        instance_id: String,
        reason: String,
    },
    LeaderHeartbeat {
        instance_id: String,
    },
    LeaderUnhealthy {
        instance_id: String,
        error: String,
    },
    ExecutionSuccess {
        job_id: JobId,
        execution_id: String,
        attempts: u32,
    },
    ExecutionFailed {
        job_id: JobId,
        execution_id: String,
        attempts: u32,
        error: String,
    },
    ExecutionRetry {
        job_id: JobId,
        execution_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    ExecutionCancelled {
        job_id: JobId,
        execution_id: String,
    },
    CircuitBreakerChanged {
        key: String,
        state: CircuitState,
    },
    MemoryThresholdExceeded {
        job_id: JobId,
        used_bytes: u64,
        threshold_bytes: u64,
    },
    JobsCrashed {
        executions: Vec<RunningExecutionRecord>,
    },
    StatePersisted {
        jobs: usize,
    },
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerEvent::SchedulerStarted { .. } => "scheduler:started",
            SchedulerEvent::SchedulerShutdown { .. } => "scheduler:shutdown",
            SchedulerEvent::JobRegistered { .. } => "job:registered",
            SchedulerEvent::JobUnregistered { .. } => "job:unregistered",
            SchedulerEvent::JobEnabled { .. } => "job:enabled",
            SchedulerEvent::JobQueued { .. } => "job:queued",
            SchedulerEvent::JobStart { .. } => "job:start",
            SchedulerEvent::JobComplete { .. } => "job:complete",
            SchedulerEvent::JobError { .. } => "job:error",
            SchedulerEvent::LeaderElected { .. } => "leader:elected",
            SchedulerEvent::LeaderStepdown { .. } => "leader:stepdown",
            SchedulerEvent::LeaderHeartbeat { .. } => "leader:heartbeat",
            SchedulerEvent::LeaderUnhealthy { .. } => "leader:unhealthy",
            SchedulerEvent::ExecutionSuccess { .. } => "execution:success",
            SchedulerEvent::ExecutionFailed { .. } => "execution:failed",
            SchedulerEvent::ExecutionRetry { .. } => "execution:retry",
            SchedulerEvent::ExecutionCancelled { .. } => "execution:cancelled",
            SchedulerEvent::CircuitBreakerChanged { state, .. } => match state {
                CircuitState::Open => "circuit-breaker:open",
                CircuitState::HalfOpen => "circuit-breaker:half-open",
                CircuitState::Closed => "circuit-breaker:closed",
            },
            SchedulerEvent::MemoryThresholdExceeded { .. } => "memory-threshold-exceeded",
            SchedulerEvent::JobsCrashed { .. } => "jobs-crashed",
            SchedulerEvent::StatePersisted { .. } => "state-persisted",
        }
    }
}

/// 基于 broadcast 的事件总线，发布从不阻塞
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 没有订阅者时事件直接丢弃
    pub fn publish(&self, event: SchedulerEvent) {
        tracing::trace!(event = event.name(), "发布调度事件");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
