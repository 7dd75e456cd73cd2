use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use scheduler_config::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};

use crate::events::{EventBus, SchedulerEvent};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - calls are blocked
    Open,
    /// Circuit is half-open - a single trial call is allowed
    HalfOpen,
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            last_failure_time: None,
        }
    }

    /// Calculate failure rate
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    stats: CircuitBreakerStats,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// 每次状态迁移加一，用来识别迁移前放行的调用
    epoch: u64,
}

impl BreakerInner {
    fn transition(&mut self, state: CircuitState) -> Option<CircuitState> {
        self.stats.state = state;
        self.epoch += 1;
        self.opened_at = (state == CircuitState::Open).then(Instant::now);
        self.trial_in_flight = state == CircuitState::HalfOpen;
        Some(state)
    }

    fn is_current(&self, permit: BreakerPermit) -> bool {
        permit.epoch == self.epoch
    }
}

/// `try_acquire` 放行的凭证，结果必须凭它回报
///
/// 凭证绑定放行时的状态代数；熔断器之后发生过迁移的话，该调用的结果只计入统计，
/// 不再驱动状态机。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPermit {
    epoch: u64,
    trial: bool,
}

impl BreakerPermit {
    /// 是否为半开状态下的试探调用
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Per-key circuit breaker.
///
/// CLOSED -> OPEN once consecutive failures reach the threshold. OPEN rejects
/// every call until `reset_timeout` has elapsed, then admits exactly one trial
/// call in HALF_OPEN; concurrent callers are rejected while it is in flight.
/// Only the trial's outcome moves HALF_OPEN to CLOSED or back to OPEN.
///
/// The state lives behind a `std::sync::Mutex` that is never held across an
/// `.await`, so all transitions are synchronous.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(&CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                stats: CircuitBreakerStats::new(),
                opened_at: None,
                trial_in_flight: false,
                epoch: 0,
            }),
        }
    }

    pub fn with_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.reset_timeout())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // 状态更新都是简单赋值，被毒化后继续使用也是安全的
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reset_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|opened| opened.elapsed() >= self.reset_timeout)
            .unwrap_or(true)
    }

    /// 判断是否允许本次调用。放行时返回凭证，第二项为发生的状态迁移（OPEN -> HALF_OPEN）
    pub fn try_acquire(&self) -> (Option<BreakerPermit>, Option<CircuitState>) {
        let mut inner = self.lock();
        match inner.stats.state {
            CircuitState::Closed => (
                Some(BreakerPermit {
                    epoch: inner.epoch,
                    trial: false,
                }),
                None,
            ),
            CircuitState::Open if self.reset_elapsed(&inner) => {
                let transition = inner.transition(CircuitState::HalfOpen);
                let permit = BreakerPermit {
                    epoch: inner.epoch,
                    trial: true,
                };
                (Some(permit), transition)
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                let permit = BreakerPermit {
                    epoch: inner.epoch,
                    trial: true,
                };
                (Some(permit), None)
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.stats.rejected_calls += 1;
                (None, None)
            }
        }
    }

    /// Whether a call would currently be admitted, without side effects
    pub fn allows_calls(&self) -> bool {
        let inner = self.lock();
        match inner.stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.reset_elapsed(&inner),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Record successful call; returns the new state if it changed
    pub fn record_success(&self, permit: BreakerPermit) -> Option<CircuitState> {
        let mut inner = self.lock();
        inner.stats.total_calls += 1;
        inner.stats.successful_calls += 1;
        if !inner.is_current(permit) {
            return None;
        }

        inner.stats.consecutive_failures = 0;
        match inner.stats.state {
            CircuitState::HalfOpen if permit.trial => inner.transition(CircuitState::Closed),
            _ => None,
        }
    }

    /// Record failed call; returns the new state if it changed
    pub fn record_failure(&self, permit: BreakerPermit) -> Option<CircuitState> {
        let mut inner = self.lock();
        inner.stats.total_calls += 1;
        inner.stats.failed_calls += 1;
        inner.stats.last_failure_time = Some(Utc::now());
        if !inner.is_current(permit) {
            return None;
        }

        inner.stats.consecutive_failures += 1;
        match inner.stats.state {
            CircuitState::Closed if inner.stats.consecutive_failures >= self.failure_threshold => {
                inner.transition(CircuitState::Open)
            }
            // 试探失败，重新打开并重置计时
            CircuitState::HalfOpen if permit.trial => inner.transition(CircuitState::Open),
            _ => None,
        }
    }

    /// 调用被取消时释放半开试探名额，不计入成功或失败
    pub fn abandon(&self, permit: BreakerPermit) {
        let mut inner = self.lock();
        if permit.trial && inner.is_current(permit) {
            inner.trial_in_flight = false;
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.lock().stats.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.lock().stats.clone()
    }

    /// Force open circuit (for maintenance)
    pub fn force_open(&self) {
        self.lock().transition(CircuitState::Open);
    }

    /// Force close circuit
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.stats.consecutive_failures = 0;
        inner.transition(CircuitState::Closed);
    }

    /// Reset circuit breaker to closed state and clear statistics
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.stats = CircuitBreakerStats::new();
        inner.transition(CircuitState::Closed);
    }
}

/// 按任务键懒创建的熔断器集合，状态迁移会发布到事件总线
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    events: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        self.map()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::with_config(&self.config)))
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.map().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.map().remove(key)
    }

    /// 尝试通过熔断器，放行时返回凭证
    pub fn try_acquire(&self, key: &str) -> Option<BreakerPermit> {
        let (permit, transition) = self.get_or_create(key).try_acquire();
        self.notify(key, transition);
        permit
    }

    pub fn record_success(&self, key: &str, permit: BreakerPermit) {
        let transition = self.get_or_create(key).record_success(permit);
        self.notify(key, transition);
    }

    /// 记录失败，返回记录后熔断器是否处于打开状态
    pub fn record_failure(&self, key: &str, permit: BreakerPermit) -> bool {
        let breaker = self.get_or_create(key);
        let transition = breaker.record_failure(permit);
        self.notify(key, transition);
        breaker.state() == CircuitState::Open
    }

    pub fn abandon(&self, key: &str, permit: BreakerPermit) {
        if let Some(breaker) = self.get(key) {
            breaker.abandon(permit);
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        self.get(key)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn force_open(&self, key: &str) {
        self.get_or_create(key).force_open();
        self.notify(key, Some(CircuitState::Open));
    }

    pub fn force_close(&self, key: &str) {
        self.get_or_create(key).force_close();
        self.notify(key, Some(CircuitState::Closed));
    }

    pub fn reset(&self, key: &str) {
        if let Some(breaker) = self.get(key) {
            breaker.reset();
        }
    }

    pub fn stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.map()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.stats()))
            .collect()
    }

    fn notify(&self, key: &str, transition: Option<CircuitState>) {
        let Some(state) = transition else {
            return;
        };
        match state {
            CircuitState::Open => tracing::warn!(key, "熔断器已打开"),
            CircuitState::HalfOpen => tracing::info!(key, "熔断器进入半开状态"),
            CircuitState::Closed => tracing::info!(key, "熔断器已关闭"),
        }
        if let Some(events) = &self.events {
            events.publish(SchedulerEvent::CircuitBreakerChanged {
                key: key.to_string(),
                state,
            });
        }
    }
}
