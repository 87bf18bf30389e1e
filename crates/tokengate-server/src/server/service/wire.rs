//! JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};
use tokengate::VerificationResult;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckTokensRequest {
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    Invalid,
}

/// One entry of the check-tokens response, at the same position as the
/// token it describes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenReport {
    pub status: TokenStatus,
    pub message: String,
    /// Exchanged credential, for a valid token.
    pub access_token: Option<String>,
    /// The submitted token, trimmed, for a valid token.
    pub refresh_token: Option<String>,
}

impl From<VerificationResult> for TokenReport {
    fn from(result: VerificationResult) -> Self {
        match result {
            VerificationResult::Valid {
                exchanged_credential,
                original_token,
            } => Self {
                status: TokenStatus::Valid,
                message: "Token is valid".to_string(),
                access_token: Some(exchanged_credential),
                refresh_token: Some(original_token),
            },
            VerificationResult::Invalid { reason } => Self {
                status: TokenStatus::Invalid,
                message: reason.to_string(),
                access_token: None,
                refresh_token: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingStatus {
    Serving,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthReport {
    pub status: ServingStatus,
    pub tracked_clients: usize,
    pub available_permits: usize,
}
