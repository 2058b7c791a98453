// 熔断器
// 保护可能独立失败的外部依赖

pub mod breaker;
pub mod state;

pub use breaker::{CircuitBreaker, CircuitError};
pub use state::{Admission, CircuitBreakerConfig, CircuitState, CircuitStatus};
