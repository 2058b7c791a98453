mod handler;
mod model;

pub use handler::{disable, setup, status, verify};
pub use model::{MfaStatusResponse, VerifyMfaRequest};
