use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::config;
use crate::error::{AppError, AppResult};
use crate::stripe::{verify_event, WebhookEvent};
use crate::subscriptions::Reconciler;

/// Provider webhook entrypoint. Signature problems are the only 400; once an
/// event verifies and parses, handler-internal failures are logged and the
/// provider still gets its acknowledgement so it does not retry-storm us.
pub async fn provider_webhook(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::SignatureError)?;

    let event = verify_event(
        &body,
        signature,
        config::STRIPE_WEBHOOK_SECRET.as_str(),
        *config::WEBHOOK_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )?;

    if let WebhookEvent::Unrecognized(ref event_type) = event {
        tracing::debug!(%event_type, "ignoring unrecognized webhook event");
        return Ok(Json(json!({ "received": true })));
    }

    if let Err(err) = reconciler.apply_event(event).await {
        tracing::error!(?err, "webhook handler failed after verification");
    }
    Ok(Json(json!({ "received": true })))
}
