use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use crate::{
    AppState,
    middleware::{authenticate, authorize, cache_response, log_errors, rate_limit, require_mfa},
    routes,
};

/// 控制面自身提供的路由
pub fn control_plane_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/mfa/setup", post(routes::mfa::setup))
        .route("/auth/mfa/verify", post(routes::mfa::verify))
        .route("/auth/mfa/status", get(routes::mfa::status))
        .route("/auth/mfa/disable", post(routes::mfa::disable))
}

/// 为路由套上请求控制链
///
/// 执行顺序（外到内）: 错误日志 -> 限流 -> 认证 -> 授权 -> MFA -> 响应缓存 -> 处理函数。
/// MFA 校验在缓存之前，命中缓存也不能绕过敏感路由的二次验证。
pub fn control_plane(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(from_fn_with_state(state.response_cache.clone(), cache_response))
        .layer(from_fn_with_state(state.clone(), require_mfa))
        .layer(from_fn_with_state(state.clone(), authorize))
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit))
        .layer(from_fn(log_errors))
        .with_state(state)
}

pub fn app(state: AppState) -> Router {
    control_plane(control_plane_routes(), state)
}
