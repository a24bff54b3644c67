// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile routes for authenticated users.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{SubscriptionStatus, Tier, UserProfile};
use crate::services::entitlement::{resolve_entitlements, Entitlements};
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/me/terms", post(accept_terms))
}

/// Current user's entitlement summary.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub user_id: String,
    /// Strongest grant across domains
    pub tier: Tier,
    pub general_tier: Tier,
    pub nursing_tier: Tier,
    pub is_beta: bool,
    pub nursing_pass_expires_at: Option<String>,
    pub general_pass_expires_at: Option<String>,
    pub annual_expires_at: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub terms_accepted_at: Option<String>,
}

fn format_opt(date: Option<DateTime<Utc>>) -> Option<String> {
    date.map(format_utc_rfc3339)
}

impl MeResponse {
    pub fn new(profile: &UserProfile, entitlements: Entitlements, is_beta: bool) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            tier: entitlements.tier,
            general_tier: entitlements.general_tier,
            nursing_tier: entitlements.nursing_tier,
            is_beta,
            nursing_pass_expires_at: format_opt(profile.nursing_pass_expires_at),
            general_pass_expires_at: format_opt(profile.general_pass_expires_at),
            annual_expires_at: format_opt(profile.annual_expires_at),
            subscription_status: profile.subscription_status,
            terms_accepted_at: format_opt(profile.terms_accepted_at),
        }
    }
}

/// Get the current user's profile, creating it on first access.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MeResponse>> {
    let now = Utc::now();
    let profile = state.db.ensure_profile(&user.user_id, now).await?;
    let is_beta = state.db.is_beta_tester(&user.user_id).await?;

    let entitlements = resolve_entitlements(Some(&profile), is_beta, now);
    Ok(Json(MeResponse::new(&profile, entitlements, is_beta)))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TermsResponse {
    pub terms_accepted_at: String,
}

/// Record terms acceptance. Repeat calls keep the first timestamp.
async fn accept_terms(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<TermsResponse>> {
    let now = Utc::now();
    let user_id = user.user_id.clone();

    let accepted_at = state
        .db
        .reconcile_profile(&user.user_id, move |current| {
            let mut profile = current.unwrap_or_else(|| UserProfile::new(user_id.clone(), now));
            match profile.terms_accepted_at {
                Some(existing) => (None, existing),
                None => {
                    profile.terms_accepted_at = Some(now);
                    profile.updated_at = now;
                    (Some(profile), now)
                }
            }
        })
        .await?;

    tracing::info!(user_id = %user.user_id, "Terms accepted");

    Ok(Json(TermsResponse {
        terms_accepted_at: format_utc_rfc3339(accepted_at),
    }))
}
