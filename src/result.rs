use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResult<T: Serialize> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
}

impl<T: Serialize> ApiResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            content: Some(data),
        }
    }
}

/// 处理函数的统一返回类型，错误由 `AppError` 转换为响应
pub type ApiResponse<T> = Result<Json<ApiResult<T>>, AppError>;

pub fn success<T: Serialize>(data: T) -> ApiResponse<T> {
    Ok(Json(ApiResult::success(data)))
}
