// API error taxonomy. Every handler failure maps onto one of four HTTP
// statuses with a stable JSON body.

use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request is malformed or missing a required field.
    #[error("{0}")]
    BadRequest(String),
    /// Authentication is required or the presented credential is invalid.
    #[error("{0}")]
    Unauthorized(String),
    /// Authenticated caller is not the resource owner.
    #[error("{0}")]
    Forbidden(String),
    /// GitHub (or another upstream) failed; details carry the upstream text.
    #[error("{message}")]
    Upstream { message: String, details: String },
}

impl ApiError {
    /// Wrap an upstream failure, preserving its full error chain as details.
    pub fn upstream(message: impl Into<String>, source: anyhow::Error) -> Self {
        ApiError::Upstream {
            message: message.into(),
            details: format!("{source:#}"),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::Upstream { .. } => 500,
        }
    }

    /// JSON body for the error response.
    pub fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Upstream { message, details } => {
                json!({ "error": message, "details": details })
            }
            other => json!({ "error": other.to_string() }),
        }
    }
}
