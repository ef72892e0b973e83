//! HTTP route assembly

pub mod internal;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::store::Store;
use crate::telegram::{webhook, MarkupSender};

/// Telegram caps update payloads well under this
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router<S: Store + 'static, M: MarkupSender + 'static>(
    state: Arc<AppState<S, M>>,
) -> Router {
    Router::new()
        .route("/internal/link_token", post(internal::register_link_token))
        .route("/internal/otp/request", post(internal::request_otp))
        .route("/internal/otp/verify", post(internal::verify_otp))
        .route("/internal/status", get(internal::link_status))
        .route("/telegram/webhook", post(webhook::telegram_webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
