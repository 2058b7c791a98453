use axum::extract::{Extension, Json, State};

use super::model::{MfaStatusResponse, VerifyMfaRequest};
use crate::{
    AppState,
    error::AppError,
    mfa::MfaSetup,
    middleware::AuthContext,
    result::{ApiResponse, success},
};

/// 生成待验证的 TOTP 密钥，客户端据此渲染二维码
#[axum::debug_handler]
pub async fn setup(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<AppState>,
) -> ApiResponse<MfaSetup> {
    let setup = state.mfa.generate_secret(&ctx.user_id).await?;
    success(setup)
}

/// 用第一个验证码确认密钥并启用 MFA
#[axum::debug_handler]
pub async fn verify(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<AppState>,
    Json(req): Json<VerifyMfaRequest>,
) -> ApiResponse<MfaStatusResponse> {
    if !state.mfa.verify_and_enable(&ctx.user_id, &req.token).await {
        return Err(AppError::InvalidMfaToken);
    }
    success(MfaStatusResponse { enabled: true })
}

#[axum::debug_handler]
pub async fn status(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<AppState>,
) -> ApiResponse<MfaStatusResponse> {
    let enabled = state.mfa.is_enabled(&ctx.user_id).await;
    success(MfaStatusResponse { enabled })
}

/// 关闭 MFA，路由表中标记为敏感操作，需要携带当前验证码
#[axum::debug_handler]
pub async fn disable(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<AppState>,
) -> ApiResponse<MfaStatusResponse> {
    state.mfa.disable(&ctx.user_id).await?;
    success(MfaStatusResponse { enabled: false })
}
