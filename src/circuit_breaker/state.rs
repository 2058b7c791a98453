//! 熔断器状态机
//!
//! ```text
//! Closed   -> Open:     连续失败次数达到阈值
//! Open     -> HalfOpen: 距上次失败超过重置超时后的第一次调用
//! HalfOpen -> Closed:   试探调用成功，失败计数清零
//! HalfOpen -> Open:     试探调用失败或被取消，重新计时
//! ```
//!
//! 每次状态切换都会推进 generation。调用结果只对放行时所在的 generation 生效，
//! 切换之前放行、切换之后才返回的调用不会改变状态。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// 一次被放行的调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
    trial: bool,
}

impl Admission {
    /// 是否为半开状态下的试探调用
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// 单个依赖的熔断状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// 半开状态下试探调用是否仍在进行
    #[serde(skip)]
    trial_in_flight: bool,
    #[serde(skip)]
    generation: u64,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitState {
    pub fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_success_time: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn reset_timeout_elapsed(&self, now: DateTime<Utc>, config: &CircuitBreakerConfig) -> bool {
        match self.last_failure_time {
            Some(at) => (now - at)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= config.reset_timeout),
            None => true,
        }
    }

    fn transition(&mut self, status: CircuitStatus) {
        self.status = status;
        self.generation += 1;
    }

    fn admission(&self, trial: bool) -> Admission {
        Admission {
            generation: self.generation,
            trial,
        }
    }

    fn is_current(&self, admission: Admission) -> bool {
        admission.generation == self.generation
    }

    /// 判断本次调用是否放行，必要时从 Open 进入 HalfOpen
    pub fn try_acquire(
        &mut self,
        now: DateTime<Utc>,
        config: &CircuitBreakerConfig,
    ) -> Option<Admission> {
        match self.status {
            CircuitStatus::Closed => Some(self.admission(false)),
            CircuitStatus::Open => {
                if !self.reset_timeout_elapsed(now, config) {
                    return None;
                }
                self.transition(CircuitStatus::HalfOpen);
                self.trial_in_flight = true;
                Some(self.admission(true))
            }
            // 同一时间只放行一个试探调用
            CircuitStatus::HalfOpen => {
                if self.trial_in_flight {
                    None
                } else {
                    self.trial_in_flight = true;
                    Some(self.admission(true))
                }
            }
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>, admission: Admission) {
        self.last_success_time = Some(now);
        if !self.is_current(admission) {
            return;
        }

        match self.status {
            CircuitStatus::Closed => self.failure_count = 0,
            CircuitStatus::HalfOpen if admission.trial => {
                self.trial_in_flight = false;
                self.failure_count = 0;
                self.transition(CircuitStatus::Closed);
            }
            _ => {}
        }
    }

    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        config: &CircuitBreakerConfig,
        admission: Admission,
    ) {
        self.last_failure_time = Some(now);
        if !self.is_current(admission) {
            return;
        }

        match self.status {
            CircuitStatus::Closed => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= config.failure_threshold {
                    self.transition(CircuitStatus::Open);
                }
            }
            CircuitStatus::HalfOpen if admission.trial => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.trial_in_flight = false;
                self.transition(CircuitStatus::Open);
            }
            _ => {}
        }
    }

    /// 调用在返回结果之前被丢弃
    ///
    /// 未完成的试探按失败处理，熔断重新打开并重新计时；普通调用不计数。
    pub fn abandon(
        &mut self,
        now: DateTime<Utc>,
        config: &CircuitBreakerConfig,
        admission: Admission,
    ) {
        if admission.trial {
            self.record_failure(now, config, admission);
        }
    }
}
