use axum::{
    body::{Body, to_bytes},
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use tracing::error;

/// 日志中记录的响应体最大长度
const LOGGED_BODY_LIMIT: usize = 1024;

/// 记录所有 5xx 响应
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            error!(
                %method,
                path = %path,
                status = %parts.status,
                "Failed to read error response body: {}",
                e
            );
            return Response::from_parts(parts, Body::empty());
        }
    };

    let shown = &bytes[..bytes.len().min(LOGGED_BODY_LIMIT)];
    error!(
        %method,
        path = %path,
        status = %parts.status,
        "Server error occurred: {}",
        String::from_utf8_lossy(shown)
    );

    // 重置body以便重新构建响应
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn server_errors_keep_their_body() {
        let app = Router::new()
            .route(
                "/falha",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .layer(axum::middleware::from_fn(log_errors));

        let response = app
            .oneshot(Request::builder().uri("/falha").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"upstream down");
    }
}
