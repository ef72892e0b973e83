//! Server-to-server API handlers

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BrokerError;
use crate::phone;
use crate::state::AppState;
use crate::store::{Store, TelegramLink};
use crate::telegram::MarkupSender;

const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Check the shared internal key, accepted either as `X-Internal-Key` or as
/// a bearer token.
fn require_internal_auth(headers: &HeaderMap, key: &str) -> Result<(), BrokerError> {
    if key.is_empty() {
        tracing::error!("Internal API key not configured; rejecting request");
        return Err(BrokerError::Unauthorized);
    }

    let direct = headers
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if direct == Some(key) {
        return Ok(());
    }

    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if bearer == Some(&format!("Bearer {}", key)) {
        return Ok(());
    }

    Err(BrokerError::Unauthorized)
}

fn normalized_phone(raw: &str) -> Result<String, BrokerError> {
    phone::normalize(raw).ok_or_else(|| BrokerError::Validation("invalid phone number".into()))
}

#[derive(Debug, Deserialize)]
pub struct LinkTokenRequest {
    pub phone: String,
    /// Caller-minted token; absent means the broker generates one
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkTokenResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// POST /internal/link_token
pub async fn register_link_token<S: Store, M: MarkupSender>(
    State(state): State<Arc<AppState<S, M>>>,
    headers: HeaderMap,
    Json(request): Json<LinkTokenRequest>,
) -> Result<Json<LinkTokenResponse>, BrokerError> {
    require_internal_auth(&headers, &state.internal_key)?;

    let phone = normalized_phone(&request.phone)?;
    if request.token.as_deref() == Some("") {
        return Err(BrokerError::Validation("token must not be empty".into()));
    }

    // Only well-formed requests spend admission budget
    if !state.limiters.link_token.allow(&format!("phone:{}", phone))
        || !state.limiters.link_token_global.allow("global")
    {
        return Err(BrokerError::RateLimited);
    }

    match request.token.as_deref() {
        Some(token) => {
            let expires_at = state.registrar.register(token, &phone)?;
            Ok(Json(LinkTokenResponse {
                success: true,
                token: None,
                expires_at,
            }))
        }
        None => {
            let subject = request.subject_id.as_deref().unwrap_or(&phone);
            let (token, expires_at) = state.issuer.issue(subject, &phone)?;
            Ok(Json(LinkTokenResponse {
                success: true,
                token: Some(token),
                expires_at,
            }))
        }
    }
}

/// Target of an OTP operation: exactly one of phone or chat id
#[derive(Debug, Deserialize)]
pub struct OtpTarget {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub code: Option<String>,
}

fn resolve_link<S: Store, M: MarkupSender>(
    state: &AppState<S, M>,
    target: &OtpTarget,
) -> Result<TelegramLink, BrokerError> {
    if let Some(raw) = &target.phone {
        let phone = normalized_phone(raw)?;
        return state.otp.resolve_by_phone(&phone);
    }
    if let Some(chat_id) = target.chat_id {
        return state.otp.resolve_by_chat(chat_id);
    }
    Err(BrokerError::Validation("phone or chat_id is required".into()))
}

/// POST /internal/otp/request
pub async fn request_otp<S: Store, M: MarkupSender>(
    State(state): State<Arc<AppState<S, M>>>,
    headers: HeaderMap,
    Json(target): Json<OtpTarget>,
) -> Result<Json<Value>, BrokerError> {
    require_internal_auth(&headers, &state.internal_key)?;

    let link = resolve_link(&state, &target)?;

    if !state.limiters.otp_chat.allow(&format!("chat:{}", link.chat_id))
        || !state.limiters.otp_global.allow("bot")
    {
        return Err(BrokerError::RateLimited);
    }

    state.otp.request(&link).await?;
    Ok(Json(json!({ "success": true, "sent": true })))
}

/// POST /internal/otp/verify
pub async fn verify_otp<S: Store, M: MarkupSender>(
    State(state): State<Arc<AppState<S, M>>>,
    headers: HeaderMap,
    Json(target): Json<OtpTarget>,
) -> Result<Json<Value>, BrokerError> {
    require_internal_auth(&headers, &state.internal_key)?;

    let code = match target.code.as_deref() {
        Some(code) if !code.is_empty() => code,
        _ => return Err(BrokerError::Validation("code is required".into())),
    };

    let link = resolve_link(&state, &target)?;
    state.otp.verify(&link.subject_id, code)?;

    Ok(Json(json!({
        "success": true,
        "verified": true,
        "subject_id": link.subject_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub phone: String,
}

/// GET /internal/status?phone=
pub async fn link_status<S: Store, M: MarkupSender>(
    State(state): State<Arc<AppState<S, M>>>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Value>, BrokerError> {
    require_internal_auth(&headers, &state.internal_key)?;

    let phone = normalized_phone(&query.phone)?;
    let linked = state.store.link_by_phone(&phone)?.is_some();
    Ok(Json(json!({ "success": true, "linked": linked })))
}
