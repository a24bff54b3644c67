// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Stripe events.

use crate::error::AppError;
use crate::services::stripe::{verify_signature, StripeEvent};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/stripe", post(stripe_webhook))
}

/// Handle a Stripe event (POST).
///
/// The signature is checked over the raw body before anything is parsed.
/// Only a failed verification is rejected (400). A verified event is
/// acknowledged with 200 even when it cannot be applied, except when the
/// store is unreachable: then 503 lets Stripe redeliver, which is safe
/// because application is idempotent per event id.
async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    verify_signature(
        &body,
        signature,
        &state.config.stripe_webhook_secret,
        chrono::Utc::now().timestamp(),
    )?;

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse verified Stripe event");
            return Ok(StatusCode::OK);
        }
    };

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        "Stripe event received"
    );

    match state.reconcile.handle(&event).await {
        Ok(_) => Ok(StatusCode::OK),
        Err(AppError::Database(msg)) => {
            tracing::error!(
                event_id = %event.id,
                error = %msg,
                "Store unavailable while applying event, asking for redelivery"
            );
            Ok(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Failed to apply Stripe event"
            );
            Ok(StatusCode::OK)
        }
    }
}
