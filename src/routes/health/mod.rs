mod handler;
mod model;

pub use handler::{KV_STORE_DEPENDENCY, health};
pub use model::{CircuitReport, HealthResponse, HealthStatus, StoreReport};
