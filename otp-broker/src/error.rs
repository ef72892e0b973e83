//! Broker error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid or expired link token")]
    InvalidToken,

    #[error("Phone not linked to a chat")]
    NotLinked,

    #[error("Invalid verification code")]
    InvalidOtp,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not authorized")]
    Unauthorized,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            BrokerError::InvalidToken => (StatusCode::BAD_REQUEST, "Invalid or expired link token"),
            BrokerError::NotLinked => (StatusCode::BAD_REQUEST, "Phone not linked to a chat"),
            BrokerError::InvalidOtp => (StatusCode::UNAUTHORIZED, "Invalid verification code"),
            BrokerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
            BrokerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            BrokerError::Unauthorized => (StatusCode::UNAUTHORIZED, "Not authorized"),
            BrokerError::Delivery(msg) => {
                tracing::error!("Delivery failed: {}", msg);
                (StatusCode::BAD_GATEWAY, "Delivery failed")
            }
            BrokerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "success": false, "reason": message });
        (status, axum::Json(body)).into_response()
    }
}
