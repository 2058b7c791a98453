use axum::extract::Extension;
use serde::Serialize;

use crate::{
    middleware::AuthContext,
    result::{ApiResponse, success},
};

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub roles: Vec<String>,
}

/// 返回当前令牌对应的身份
pub async fn me(Extension(ctx): Extension<AuthContext>) -> ApiResponse<MeResponse> {
    success(MeResponse {
        user_id: ctx.user_id,
        roles: ctx.roles,
    })
}
