mod access;
mod auth;
mod error_handler;
mod mfa_guard;
mod rate_limit;
mod response_cache;

pub use access::{Access, AccessTable, RouteRule, authorize};
pub use auth::{AuthContext, authenticate};
pub use error_handler::log_errors;
pub use mfa_guard::{MFA_TOKEN_HEADER, require_mfa};
pub use rate_limit::{
    RateLimitDecision, RateLimitPolicies, RateLimitPolicy, RateLimiter, client_ip,
    parse_route_policies, rate_limit,
};
pub use response_cache::{
    CACHE_STATUS_HEADER, CacheStatus, CachedResponse, RESPONSE_TIME_HEADER, ResponseCache,
    cache_response,
};
