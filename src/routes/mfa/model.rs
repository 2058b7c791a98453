use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct VerifyMfaRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MfaStatusResponse {
    pub enabled: bool,
}
