use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::state::{Admission, CircuitBreakerConfig, CircuitState, CircuitStatus};
use crate::clock::Clock;

#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// 熔断打开，调用未执行
    #[error("circuit for {0} is open")]
    Open(String),

    /// 依赖本身返回的错误
    #[error("dependency call failed: {0}")]
    Failed(E),
}

/// 调用结束前持有的放行凭证，未记录结果就被丢弃时按放弃处理
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    dependency: &'a str,
    admission: Option<Admission>,
}

impl Permit<'_> {
    fn succeed(mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_success(self.dependency, admission);
        }
    }

    fn fail(mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_failure(self.dependency, admission);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_abandoned(self.dependency, admission);
        }
    }
}

/// 按依赖名管理的熔断器
///
/// 状态只保存在本进程中，每个依赖在第一次使用时惰性创建。
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: DashMap<String, CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 通过熔断器执行调用
    ///
    /// 熔断打开时直接返回 [`CircuitError::Open`]，不调用 `call`。
    /// 返回的 future 在完成前被丢弃（客户端断开、超时）时，半开试探按失败记录。
    pub async fn guarded<T, E, F, Fut>(
        &self,
        dependency: &str,
        call: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // DashMap 的引用不能跨 await 持有
        let admission = {
            let mut circuit = self.circuits.entry(dependency.to_string()).or_default();
            circuit.try_acquire(self.clock.now(), &self.config)
        };

        let Some(admission) = admission else {
            debug!(dependency, "Circuit open, rejecting call");
            return Err(CircuitError::Open(dependency.to_string()));
        };

        let permit = Permit {
            breaker: self,
            dependency,
            admission: Some(admission),
        };
        match call().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(CircuitError::Failed(e))
            }
        }
    }

    fn record_success(&self, dependency: &str, admission: Admission) {
        let mut circuit = self.circuits.entry(dependency.to_string()).or_default();
        let before = circuit.status;
        circuit.record_success(self.clock.now(), admission);
        if before != CircuitStatus::Closed && circuit.status == CircuitStatus::Closed {
            debug!(dependency, "Circuit closed after successful trial");
        }
    }

    fn record_failure(&self, dependency: &str, admission: Admission) {
        let mut circuit = self.circuits.entry(dependency.to_string()).or_default();
        let before = circuit.status;
        circuit.record_failure(self.clock.now(), &self.config, admission);
        if before != CircuitStatus::Open && circuit.status == CircuitStatus::Open {
            warn!(
                dependency,
                failures = circuit.failure_count,
                "Circuit opened"
            );
        }
    }

    fn record_abandoned(&self, dependency: &str, admission: Admission) {
        if admission.is_trial() {
            warn!(dependency, "Half-open trial dropped before completion, reopening circuit");
        }
        let mut circuit = self.circuits.entry(dependency.to_string()).or_default();
        circuit.abandon(self.clock.now(), &self.config, admission);
    }

    pub fn state(&self, dependency: &str) -> Option<CircuitState> {
        self.circuits.get(dependency).map(|circuit| circuit.clone())
    }

    /// 所有依赖的状态快照，按名称排序
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let mut circuits: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        circuits.sort_by(|a, b| a.0.cmp(&b.0));
        circuits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::default();
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        };
        (CircuitBreaker::new(config, Arc::new(clock.clone())), clock)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        breaker.guarded("db", || async { Err("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u8, CircuitError<&'static str>> {
        breaker.guarded("db", || async { Ok(7) }).await
    }

    #[tokio::test]
    async fn open_circuit_skips_the_call() {
        let (breaker, _) = breaker();
        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(CircuitError::Failed("boom"))));
        }
        assert_eq!(breaker.state("db").unwrap().status, CircuitStatus::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), CircuitError<()>> = breaker
            .guarded("db", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open(ref name)) if name.as_str() == "db"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        clock.advance(chrono::Duration::seconds(30));
        let observed: Result<CircuitStatus, CircuitError<()>> = breaker
            .guarded("db", || async { Ok(breaker.state("db").unwrap().status) })
            .await;
        assert_eq!(observed.unwrap(), CircuitStatus::HalfOpen);

        let state = breaker.state("db").unwrap();
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(state.last_success_time.is_some());
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn failed_trial_reopens() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        clock.advance(chrono::Duration::seconds(31));
        assert!(matches!(fail(&breaker).await, Err(CircuitError::Failed(_))));
        assert_eq!(breaker.state("db").unwrap().status, CircuitStatus::Open);
        assert!(matches!(succeed(&breaker).await, Err(CircuitError::Open(_))));
    }

    #[tokio::test]
    async fn dependencies_are_tracked_independently() {
        let (breaker, _) = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        let other: Result<(), CircuitError<()>> =
            breaker.guarded("redis", || async { Ok(()) }).await;
        assert!(other.is_ok());

        let names: Vec<String> = breaker.snapshot().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["db".to_string(), "redis".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_trial_does_not_wedge_half_open() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        clock.advance(chrono::Duration::seconds(31));
        let hung = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.guarded("db", std::future::pending::<Result<(), ()>>),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(breaker.state("db").unwrap().status, CircuitStatus::Open);

        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state("db").unwrap().status, CircuitStatus::Closed);
    }

    #[tokio::test]
    async fn slow_success_admitted_before_opening_keeps_circuit_open() {
        let (breaker, _) = breaker();
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let slow = breaker.guarded("db", || async move {
            released.await.map_err(|_| "sender dropped")?;
            Ok::<u8, &'static str>(1)
        });
        let trip = async {
            for _ in 0..3 {
                let _ = fail(&breaker).await;
            }
            let _ = release.send(());
        };
        let (slow_result, ()) = tokio::join!(slow, trip);

        assert_eq!(slow_result.unwrap(), 1);
        let state = breaker.state("db").unwrap();
        assert_eq!(state.status, CircuitStatus::Open);
        assert!(matches!(succeed(&breaker).await, Err(CircuitError::Open(_))));
    }
}
