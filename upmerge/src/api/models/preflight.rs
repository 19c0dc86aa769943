use serde::{Deserialize, Serialize};

/// Body of a successful pre-flight check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightResponse {
    pub status: String,
    /// Account the CSRF token was validated against
    pub account_id: String,
}

impl PreflightResponse {
    pub fn ok(account_id: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            account_id: account_id.into(),
        }
    }
}
