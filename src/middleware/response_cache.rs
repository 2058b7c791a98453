use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};

use super::auth::AuthContext;
use crate::cache::{CacheClient, StoreError, StoreResult, keys::response_cache_key};
use crate::clock::Clock;

pub const CACHE_STATUS_HEADER: &str = "x-cache";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Error,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Error => "ERROR",
        }
    }
}

/// 缓存的响应内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub cached_at: i64, // Unix timestamp
}

/// 按用户隔离的响应缓存
///
/// 只缓存已认证用户的 GET 请求，条目写入后不再更新，依靠 TTL 过期。
pub struct ResponseCache {
    store: CacheClient,
    ttl_secs: u64,
    max_body_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(
        store: CacheClient,
        ttl_secs: u64,
        max_body_bytes: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ttl_secs,
            max_body_bytes,
            clock,
        }
    }

    /// 查找缓存，读取或反序列化失败都视为未命中
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        match self.store.get_json::<CachedResponse>(key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(key, "Response cache lookup failed, bypassing: {}", e);
                None
            }
        }
    }

    pub async fn save(
        &self,
        key: &str,
        status: StatusCode,
        content_type: Option<&str>,
        body: &[u8],
    ) -> StoreResult<()> {
        let body = String::from_utf8(body.to_vec())
            .map_err(|_| StoreError::Unavailable("response body is not valid UTF-8".to_string()))?;
        let cached = CachedResponse {
            status: status.as_u16(),
            content_type: content_type.map(str::to_string),
            body,
            cached_at: self.clock.now().timestamp(),
        };
        self.store.set_json(key, &cached, Some(self.ttl_secs)).await
    }
}

fn tag(response: &mut Response, status: CacheStatus) {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
}

fn tag_miss(response: &mut Response, elapsed: std::time::Duration) {
    tag(response, CacheStatus::Miss);
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
}

fn replay(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    if let Some(content_type) = cached
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    tag(&mut response, CacheStatus::Hit);
    response
}

pub async fn cache_response(
    State(cache): State<Arc<ResponseCache>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }
    // 匿名请求不走缓存
    let Some(ctx) = req.extensions().get::<AuthContext>() else {
        return next.run(req).await;
    };

    let key = response_cache_key(
        req.method().as_str(),
        req.uri().path(),
        req.uri().query(),
        &ctx.user_id,
    );

    if let Some(cached) = cache.lookup(&key).await {
        tracing::debug!(key = %key, "Response cache hit");
        return replay(cached);
    }

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed();

    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();

    // 长度未知或超过上限的响应体不缓冲，原样透传
    let fits = body
        .size_hint()
        .upper()
        .is_some_and(|size| size <= cache.max_body_bytes as u64);
    if !fits {
        tracing::debug!(key = %key, "Response too large or unsized, not caching");
        let mut response = Response::from_parts(parts, body);
        tag_miss(&mut response, elapsed);
        return response;
    }

    let bytes = match to_bytes(body, cache.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to read response body for caching: {}", e);
            let mut response = Response::from_parts(parts, Body::empty());
            tag(&mut response, CacheStatus::Error);
            return response;
        }
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok());
    let saved = cache.save(&key, parts.status, content_type, &bytes).await;

    parts.headers.remove(header::CONTENT_LENGTH);
    let mut response = Response::from_parts(parts, Body::from(bytes));
    match saved {
        Ok(()) => tag_miss(&mut response, elapsed),
        Err(e) => {
            tracing::warn!(key = %key, "Failed to cache response: {}", e);
            tag(&mut response, CacheStatus::Error);
        }
    }
    response
}
