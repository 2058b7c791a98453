use std::sync::Arc;

use cache::CacheClient;
use chrono::{DateTime, Utc};
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use clock::Clock;
use config::Config;
use mfa::MfaService;
use middleware::{AccessTable, RateLimitPolicies, RateLimiter, ResponseCache};

pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod mfa;
pub mod middleware;
pub mod result;
pub mod router;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: CacheClient,
    pub rate_limiter: Arc<RateLimiter>,
    pub response_cache: Arc<ResponseCache>,
    pub mfa: Arc<MfaService>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub access: Arc<AccessTable>,
    pub clock: Arc<dyn Clock>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config, store: CacheClient, clock: Arc<dyn Clock>) -> Self {
        let rate_limiter = RateLimiter::new(store.clone(), RateLimitPolicies::from_config(&config))
            .trust_proxy_headers(config.trust_proxy_headers);
        let response_cache = ResponseCache::new(
            store.clone(),
            config.response_cache_ttl_secs,
            config.response_cache_max_body_bytes,
            clock.clone(),
        );
        let mfa = MfaService::new(
            store.clone(),
            config.mfa_issuer.clone(),
            config.mfa_setup_ttl_secs,
            clock.clone(),
        );
        let circuit_breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold,
                reset_timeout: config.circuit_reset_timeout(),
            },
            clock.clone(),
        );

        Self {
            config: Arc::new(config),
            store,
            rate_limiter: Arc::new(rate_limiter),
            response_cache: Arc::new(response_cache),
            mfa: Arc::new(mfa),
            circuit_breaker: Arc::new(circuit_breaker),
            access: Arc::new(AccessTable::standard()),
            started_at: clock.now(),
            clock,
        }
    }

    /// 替换路由访问表，业务路由需要在这里登记
    pub fn with_access_table(mut self, access: AccessTable) -> Self {
        self.access = Arc::new(access);
        self
    }
}
