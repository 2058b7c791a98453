use axum::Json;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::cache::StoreError;
use crate::mfa::MfaError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("rate limit exceeded, retry after {retry_after}s")]
    TooManyRequests { retry_after: u64 },

    #[error("MFA token required")]
    MfaRequired,

    #[error("invalid MFA token")]
    InvalidMfaToken,

    #[error("dependency {0} is unavailable")]
    CircuitOpen(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mfa(#[from] MfaError),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::MfaRequired | AppError::InvalidMfaToken => {
                StatusCode::FORBIDDEN
            }
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) | AppError::Mfa(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, message, retry_after) = match &self {
            AppError::Unauthorized => (
                "Unauthorized",
                "A valid bearer token is required".to_string(),
                None,
            ),
            AppError::Forbidden => (
                "Forbidden",
                "You do not have permission to access this resource".to_string(),
                None,
            ),
            AppError::TooManyRequests { retry_after } => (
                "Too Many Requests",
                format!("Rate limit exceeded, try again in {} seconds", retry_after),
                Some(*retry_after),
            ),
            AppError::MfaRequired => (
                "MFA Required",
                "This operation requires an MFA token".to_string(),
                None,
            ),
            AppError::InvalidMfaToken => (
                "Invalid MFA Token",
                "The MFA token is invalid or expired".to_string(),
                None,
            ),
            AppError::CircuitOpen(dependency) => (
                "Service Unavailable",
                format!("{} is temporarily unavailable", dependency),
                None,
            ),
            // 内部错误细节只写日志，不返回给客户端
            AppError::Store(_) | AppError::Mfa(_) | AppError::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    "Internal Server Error",
                    "An unexpected error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error,
            message,
            retry_after,
        });

        let mut response = (status, body).into_response();
        if let Some(retry_after) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rate_limit_error_carries_retry_hint() {
        let response = AppError::TooManyRequests { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let body = body_json(response).await;
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["retryAfter"], 42);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn mfa_errors_are_distinguishable() {
        let required = AppError::MfaRequired.into_response();
        let invalid = AppError::InvalidMfaToken.into_response();
        assert_eq!(required.status(), StatusCode::FORBIDDEN);
        assert_eq!(invalid.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(required).await["error"], "MFA Required");
        assert_eq!(body_json(invalid).await["error"], "Invalid MFA Token");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = AppError::Internal("db password leaked".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body.get("retryAfter").is_none());
        assert!(!body["message"].as_str().unwrap().contains("password"));
    }
}
