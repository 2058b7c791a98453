use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    cache::{CacheClient, StoreResult, keys::rate_limit_key},
    config::Config,
    error::AppError,
};

/// 单个端点的限流策略: 窗口内最多 `max` 次请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    pub max: u64,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(max: u64, window_secs: u64) -> Self {
        Self { max, window_secs }
    }
}

/// 端点路径到限流策略的映射
#[derive(Debug, Clone)]
pub struct RateLimitPolicies {
    routes: HashMap<String, RateLimitPolicy>,
    default: RateLimitPolicy,
}

impl RateLimitPolicies {
    pub fn new(default: RateLimitPolicy) -> Self {
        Self {
            routes: HashMap::new(),
            default,
        }
    }

    /// 默认策略表
    pub fn standard(default: RateLimitPolicy) -> Self {
        Self::new(default)
            .with_route("/auth/login", RateLimitPolicy::new(5, 60))
            .with_route("/auth/mfa/verify", RateLimitPolicy::new(5, 60))
            .with_route("/estudantes", RateLimitPolicy::new(100, 60))
    }

    pub fn from_config(config: &Config) -> Self {
        let default =
            RateLimitPolicy::new(config.rate_limit_requests, config.rate_limit_window_secs);
        let mut policies = Self::standard(default);
        if let Some(overrides) = &config.rate_limit_routes {
            for (path, policy) in parse_route_policies(overrides) {
                policies = policies.with_route(&path, policy);
            }
        }
        policies
    }

    pub fn with_route(mut self, path: &str, policy: RateLimitPolicy) -> Self {
        let path = path.trim_end_matches('/');
        self.routes
            .insert(if path.is_empty() { "/" } else { path }.to_string(), policy);
        self
    }

    pub fn default_policy(&self) -> RateLimitPolicy {
        self.default
    }

    /// 先精确匹配，再按路径段取最长前缀，都没有时使用默认策略
    pub fn policy_for(&self, path: &str) -> RateLimitPolicy {
        let mut candidate = path.trim_end_matches('/');
        loop {
            let lookup = if candidate.is_empty() { "/" } else { candidate };
            if let Some(policy) = self.routes.get(lookup) {
                return *policy;
            }
            match candidate.rfind('/') {
                Some(idx) if !candidate.is_empty() => candidate = &candidate[..idx],
                _ => return self.default,
            }
        }
    }
}

/// 解析 `path=max/window,...` 格式的策略覆盖，格式错误的项被忽略
pub fn parse_route_policies(raw: &str) -> Vec<(String, RateLimitPolicy)> {
    raw.split(',')
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return None;
            }
            let parsed = item.split_once('=').and_then(|(path, limit)| {
                let (max, window) = limit.split_once('/')?;
                Some((
                    path.trim().to_string(),
                    RateLimitPolicy::new(max.trim().parse().ok()?, window.trim().parse().ok()?),
                ))
            });
            if parsed.is_none() {
                tracing::warn!("Ignoring malformed rate limit override: {}", item);
            }
            parsed
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { limit: u64, remaining: u64 },
    Limited { retry_after: u64 },
}

/// 固定窗口限流器
///
/// 计数器在第一次请求时创建并设置窗口过期时间，之后的自增不会延长窗口。
/// 存储不可用时放行请求。
#[derive(Clone)]
pub struct RateLimiter {
    store: CacheClient,
    policies: Arc<RateLimitPolicies>,
    trust_proxy_headers: bool,
}

impl RateLimiter {
    pub fn new(store: CacheClient, policies: RateLimitPolicies) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
            trust_proxy_headers: false,
        }
    }

    /// 部署在反向代理之后时，用代理写入的请求头识别客户端
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    pub async fn check(&self, client: &str, method: &str, path: &str) -> RateLimitDecision {
        let policy = self.policies.policy_for(path);
        match self.try_check(client, method, path, policy).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    client,
                    method,
                    path,
                    "Rate limit check failed, allowing request: {}",
                    e
                );
                RateLimitDecision::Allowed {
                    limit: policy.max,
                    remaining: policy.max,
                }
            }
        }
    }

    async fn try_check(
        &self,
        client: &str,
        method: &str,
        path: &str,
        policy: RateLimitPolicy,
    ) -> StoreResult<RateLimitDecision> {
        let key = rate_limit_key(client, method, path);

        // 计数为 1 时才设置过期时间
        let count = self.store.incr_with_window(&key, policy.window_secs).await?;
        let count = count.max(0) as u64;

        if count <= policy.max {
            return Ok(RateLimitDecision::Allowed {
                limit: policy.max,
                remaining: policy.max - count,
            });
        }

        let mut retry_after = self.store.ttl(&key).await?;
        if retry_after == -1 {
            // 自增与设置过期之间进程崩溃留下的键，补设一次窗口
            tracing::warn!(key = %key, "Rate limit key has no expiry, arming window");
            self.store.expire(&key, policy.window_secs).await?;
            retry_after = policy.window_secs as i64;
        }

        tracing::info!(client, method, path, count, "Rate limit exceeded");
        Ok(RateLimitDecision::Limited {
            retry_after: retry_after.max(0) as u64,
        })
    }
}

/// 获取客户端地址
///
/// 只有 `trust_proxy_headers` 打开时才读取 x-real-ip 和 x-forwarded-for 的第一项，
/// 否则这些头可由客户端任意伪造，只使用连接地址。
pub fn client_ip(req: &Request<Body>, trust_proxy_headers: bool) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    if !trust_proxy_headers {
        return remote_ip.unwrap_or_else(|| "unknown".to_string());
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .filter(|ip| !ip.trim().is_empty())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req, limiter.trust_proxy_headers);
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    match limiter.check(&ip, &method, &path).await {
        RateLimitDecision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        RateLimitDecision::Limited { retry_after } => {
            AppError::TooManyRequests { retry_after }.into_response()
        }
    }
}
