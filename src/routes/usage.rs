// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Usage check and increment routes.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::Feature;
use crate::services::quota::QuotaDecision;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/usage/{feature}", get(get_usage))
        .route("/api/usage/check", post(check_usage))
        .route("/api/usage/increment", post(increment_usage))
}

#[derive(Deserialize)]
struct FeatureRequest {
    feature: String,
}

async fn check(state: &AppState, user_id: &str, feature: &str) -> Result<QuotaDecision> {
    let feature: Feature = feature.parse()?;
    state.usage.check(user_id, feature, chrono::Utc::now()).await
}

async fn get_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(feature): Path<String>,
) -> Result<Json<QuotaDecision>> {
    Ok(Json(check(&state, &user.user_id, &feature).await?))
}

async fn check_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<FeatureRequest>,
) -> Result<Json<QuotaDecision>> {
    Ok(Json(check(&state, &user.user_id, &body.feature).await?))
}

/// Count one use after the gated action succeeded; returns the new state.
async fn increment_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<FeatureRequest>,
) -> Result<Json<QuotaDecision>> {
    let feature: Feature = body.feature.parse()?;
    let now = chrono::Utc::now();

    state.usage.record(&user.user_id, feature, now).await?;
    tracing::info!(user_id = %user.user_id, feature = %feature, "Usage recorded");

    Ok(Json(state.usage.check(&user.user_id, feature, now).await?))
}
