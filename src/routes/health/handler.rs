use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use super::model::{CircuitReport, HealthResponse, HealthStatus, StoreReport};
use crate::{AppState, circuit_breaker::CircuitError};

/// 熔断器中键值存储的依赖名
pub const KV_STORE_DEPENDENCY: &str = "kv_store";

/// 存活探针
///
/// 单次探测失败为 degraded，熔断打开（持续失败）为 unhealthy。
/// 控制面在存储故障时会降级放行，所以只有 unhealthy 返回 503。
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.clone();
    let ping = state
        .circuit_breaker
        .guarded(KV_STORE_DEPENDENCY, || async move { store.ping().await })
        .await;

    let (status, store_report) = match ping {
        Ok(()) => (
            HealthStatus::Healthy,
            StoreReport {
                enabled: state.store.is_enabled(),
                status: "up",
                error: None,
            },
        ),
        Err(CircuitError::Failed(e)) => {
            tracing::warn!("Key-value store ping failed: {}", e);
            (
                HealthStatus::Degraded,
                StoreReport {
                    enabled: true,
                    status: "down",
                    error: Some(e.to_string()),
                },
            )
        }
        Err(CircuitError::Open(_)) => (
            HealthStatus::Unhealthy,
            StoreReport {
                enabled: true,
                status: "circuit_open",
                error: None,
            },
        ),
    };

    let circuits = state
        .circuit_breaker
        .snapshot()
        .into_iter()
        .map(|(dependency, state)| CircuitReport { dependency, state })
        .collect();

    let body = HealthResponse {
        status,
        uptime_secs: (state.clock.now() - state.started_at).num_seconds(),
        store: store_report,
        circuits,
    };

    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}
