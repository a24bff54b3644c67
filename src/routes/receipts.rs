// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mobile in-app purchase receipt validation.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::routes::api::MeResponse;
use crate::services::entitlement::resolve_entitlements;
use crate::services::receipts::{apply_receipt, Platform};
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/receipts", post(validate_receipt))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiptBody {
    pub platform: Platform,
    #[validate(length(min = 1, max = 100000))]
    pub receipt: String,
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
}

#[derive(Serialize)]
pub struct ReceiptResponse {
    /// False when this store transaction had already been applied
    pub applied: bool,
    #[serde(flatten)]
    pub profile: MeResponse,
}

async fn validate_receipt(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ReceiptBody>,
) -> Result<Json<ReceiptResponse>> {
    body.validate()?;

    if body.user_id != user.user_id {
        return Err(AppError::Forbidden("user_id does not match session".to_string()));
    }

    let now = chrono::Utc::now();
    let purchase = state.receipts.verify(body.platform, &body.receipt, now).await?;

    let user_id = user.user_id.clone();
    let verified = purchase.clone();
    let (profile, applied) = state
        .db
        .reconcile_profile(&user.user_id, move |current| {
            let snapshot = current.clone();
            match apply_receipt(current, &user_id, &verified, now) {
                Some(updated) => (Some(updated.clone()), (Some(updated), true)),
                None => (None, (snapshot, false)),
            }
        })
        .await?;

    let profile =
        profile.ok_or_else(|| AppError::Internal(anyhow::anyhow!("profile missing after receipt")))?;

    tracing::info!(
        user_id = %user.user_id,
        platform = ?purchase.platform,
        pass_type = %purchase.pass_type,
        applied,
        "Receipt applied"
    );

    let is_beta = state.db.is_beta_tester(&user.user_id).await?;
    let entitlements = resolve_entitlements(Some(&profile), is_beta, now);

    Ok(Json(ReceiptResponse {
        applied,
        profile: MeResponse::new(&profile, entitlements, is_beta),
    }))
}
