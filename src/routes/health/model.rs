use serde::Serialize;

use crate::circuit_breaker::CircuitState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct StoreReport {
    pub enabled: bool,
    /// up / down / circuit_open
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CircuitReport {
    pub dependency: String,
    #[serde(flatten)]
    pub state: CircuitState,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_secs: i64,
    pub store: StoreReport,
    pub circuits: Vec<CircuitReport>,
}
