//! Webhook update ingestion

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use super::types::Update;
use super::MarkupSender;
use crate::error::BrokerError;
use crate::state::AppState;
use crate::store::Store;

/// Shared-secret header set at setWebhook time
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// POST /telegram/webhook
///
/// Authenticates before parsing; a payload that fails to parse never reaches
/// the bot router.
pub async fn telegram_webhook<S: Store, M: MarkupSender>(
    State(state): State<Arc<AppState<S, M>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, BrokerError> {
    if let Some(expected) = &state.webhook_secret {
        let presented = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            tracing::warn!("Webhook request with missing or wrong secret");
            return Err(BrokerError::Unauthorized);
        }
    }

    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Malformed webhook payload: {}", e);
        BrokerError::Validation("malformed update payload".into())
    })?;

    state
        .bot
        .handle_update(&update)
        .await
        .map_err(|e| BrokerError::Internal(e.to_string()))?;

    Ok(StatusCode::OK)
}
