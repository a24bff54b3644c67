// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Interview Coach API Server
//!
//! Gates metered coaching features by subscription tier and reconciles
//! payments from Stripe and the mobile app stores.

use anyhow::Context;
use interview_coach_api::{config::Config, db::FirestoreDb, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(port = config.port, "Starting Interview Coach API");

    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .context("Failed to connect to Firestore")?;

    if config.apple_shared_secret.is_none() {
        tracing::warn!("APPLE_SHARED_SECRET not set, auto-renewing App Store receipts will fail");
    }
    if config.google_play_access_token.is_none() {
        tracing::warn!("GOOGLE_PLAY_ACCESS_TOKEN not set, Google Play receipts will be rejected");
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config, db));
    let app = interview_coach_api::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("interview_coach_api=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();

    Ok(())
}
