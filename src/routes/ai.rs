// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Metered AI proxy.
//!
//! Order matters: check quota, call the provider, and count the use only
//! once the provider answered. A failed generation is never charged.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Feature;
use crate::services::llm::{ChatMessage, Completion, CompletionRequest, DEFAULT_MAX_TOKENS};
use crate::services::quota::{check_quota, QuotaDecision};
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/messages", post(create_message))
}

#[derive(Debug, Deserialize, Validate)]
pub struct MessageBody {
    pub feature: String,
    #[validate(length(max = 20000))]
    pub system: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub completion: Completion,
    /// Quota state after this use
    pub usage: QuotaDecision,
}

async fn create_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<MessageBody>,
) -> Result<Json<MessageResponse>> {
    body.validate()?;
    let feature: Feature = body.feature.parse()?;
    let now = chrono::Utc::now();

    let decision = state.usage.check(&user.user_id, feature, now).await?;
    if !decision.allowed {
        tracing::info!(
            user_id = %user.user_id,
            feature = %feature,
            used = decision.used,
            limit = decision.limit,
            "Usage limit reached"
        );
        return Err(AppError::QuotaExceeded(decision));
    }

    let request = CompletionRequest {
        system: body.system,
        messages: body.messages,
        max_tokens: body.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    };
    let completion = state.llm.complete(&request).await?;

    // The user already has the answer; a failed increment is logged, not surfaced.
    if let Err(e) = state.usage.record(&user.user_id, feature, now).await {
        tracing::error!(
            user_id = %user.user_id,
            feature = %feature,
            error = %e,
            "Failed to record usage after successful generation"
        );
    }

    Ok(Json(MessageResponse {
        completion,
        usage: check_quota(decision.tier, feature, decision.used + 1),
    }))
}
