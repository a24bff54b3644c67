// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Interview Coach API: entitlements and usage accounting.
//!
//! This crate resolves which paid tier a user holds, meters monthly feature
//! usage against per-tier limits, and keeps entitlements in sync with
//! Stripe webhooks and mobile store receipts.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{AnthropicClient, ReceiptVerifier, ReconcileService, StripeClient, UsageService};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub usage: UsageService,
    pub reconcile: ReconcileService,
    pub stripe: StripeClient,
    pub receipts: ReceiptVerifier,
    pub llm: AnthropicClient,
}

impl AppState {
    /// Wire the services to a config and database handle.
    pub fn new(config: Config, db: FirestoreDb) -> Self {
        Self {
            usage: UsageService::new(db.clone()),
            reconcile: ReconcileService::new(db.clone()),
            stripe: StripeClient::new(config.stripe_secret_key.clone()),
            receipts: ReceiptVerifier::new(&config),
            llm: AnthropicClient::new(
                config.anthropic_api_key.clone(),
                config.anthropic_model.clone(),
            ),
            config,
            db,
        }
    }
}
