use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Serialize;

use crate::{AppState, utils::verify_token};

/// 已认证的请求身份，由 `authenticate` 写入请求扩展
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|role| self.roles.contains(role))
    }
}

/// 解析 Bearer 令牌
///
/// 只负责识别身份，不拒绝请求；是否需要认证由 `authorize` 根据路由表决定。
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(Authorization(bearer)) = req.headers().typed_get::<Authorization<Bearer>>() {
        match verify_token(bearer.token(), &state.config) {
            Ok(claims) => {
                req.extensions_mut()
                    .insert(AuthContext::new(claims.sub, claims.roles));
            }
            Err(e) => {
                tracing::debug!("Rejected bearer token: {}", e);
            }
        }
    }

    next.run(req).await
}
