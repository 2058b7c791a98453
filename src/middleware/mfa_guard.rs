use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{access::RouteRule, auth::AuthContext};
use crate::{AppState, error::AppError};

/// 携带当前 TOTP 令牌的请求头
pub const MFA_TOKEN_HEADER: &str = "x-mfa-token";

/// 敏感路由的 MFA 校验
///
/// 用户未启用 MFA 时直接放行；已启用时必须携带有效令牌。
/// 无法确认启用状态（存储故障）时按已启用处理。
pub async fn require_mfa(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let sensitive = req
        .extensions()
        .get::<RouteRule>()
        .is_some_and(|rule| rule.require_mfa);
    if !sensitive {
        return next.run(req).await;
    }

    let Some(ctx) = req.extensions().get::<AuthContext>().cloned() else {
        return AppError::Unauthorized.into_response();
    };

    let enabled = match state.mfa.try_is_enabled(&ctx.user_id).await {
        Ok(enabled) => enabled,
        Err(e) => {
            tracing::warn!(
                user_id = %ctx.user_id,
                "Cannot determine MFA status, requiring token: {}",
                e
            );
            true
        }
    };
    if !enabled {
        return next.run(req).await;
    }

    let token = req
        .headers()
        .get(MFA_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    match token {
        None => AppError::MfaRequired.into_response(),
        Some(token) => {
            if state.mfa.verify_token(&ctx.user_id, &token).await {
                next.run(req).await
            } else {
                tracing::info!(user_id = %ctx.user_id, "Invalid MFA token");
                AppError::InvalidMfaToken.into_response()
            }
        }
    }
}
