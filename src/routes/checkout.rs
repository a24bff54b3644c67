// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Hosted checkout session creation.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::PassType;
use crate::services::entitlement::has_equivalent_entitlement;
use crate::services::stripe::CheckoutRequest;
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/checkout", post(create_checkout))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    #[validate(length(min = 1, max = 200))]
    pub price_id: String,
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(url)]
    pub success_url: String,
    #[validate(url)]
    pub cancel_url: String,
    /// Absent for the recurring subscription
    #[serde(default)]
    pub pass_type: Option<PassType>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

/// Redirects must go back to our own frontend.
fn check_redirect(frontend_url: &str, url: &str) -> Result<()> {
    let base = frontend_url.trim_end_matches('/');
    let on_frontend = url
        .strip_prefix(base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'));
    if on_frontend {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "redirect URL must be under {}",
            frontend_url
        )))
    }
}

async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    body.validate()?;

    if body.user_id != user.user_id {
        tracing::warn!(
            auth_user = %user.user_id,
            body_user = %body.user_id,
            "Checkout requested for another user"
        );
        return Err(AppError::Forbidden("user_id does not match session".to_string()));
    }

    check_redirect(&state.config.frontend_url, &body.success_url)?;
    check_redirect(&state.config.frontend_url, &body.cancel_url)?;

    let profile = state.db.get_profile(&user.user_id).await?;
    if profile
        .as_ref()
        .is_some_and(|p| has_equivalent_entitlement(p, body.pass_type, chrono::Utc::now()))
    {
        return Err(AppError::Conflict(
            "an equivalent entitlement is already active".to_string(),
        ));
    }

    let request = CheckoutRequest {
        price_id: body.price_id,
        user_id: user.user_id.clone(),
        success_url: body.success_url,
        cancel_url: body.cancel_url,
        pass_type: body.pass_type,
        customer_id: profile.and_then(|p| p.stripe_customer_id),
    };

    let session = state.stripe.create_checkout_session(&request).await?;
    let url = session.url.ok_or_else(|| {
        AppError::upstream(crate::error::Provider::Stripe, "checkout session without URL")
    })?;

    Ok(Json(CheckoutResponse {
        url,
        session_id: session.id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_must_stay_on_frontend() {
        let frontend = "https://coach.example.com";
        assert!(check_redirect(frontend, "https://coach.example.com/billing/ok").is_ok());
        assert!(check_redirect(frontend, "https://coach.example.com?x=1").is_ok());
        assert!(check_redirect(frontend, "https://coach.example.com.evil.io/ok").is_err());
        assert!(check_redirect(frontend, "https://evil.io/https://coach.example.com").is_err());
    }
}
