// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment (secret
//! bindings), read once at startup and kept in memory.

use crate::models::PassType;
use std::env;

/// Anthropic model used when `ANTHROPIC_MODEL` is unset.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL (CORS origin, checkout redirect allowlist)
    pub frontend_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Anthropic model name
    pub anthropic_model: String,
    /// Google Play package name for receipt validation
    pub google_play_package: String,
    /// In-app product ids per pass
    pub iap_products: IapProducts,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Stripe API secret key
    pub stripe_secret_key: String,
    /// Stripe webhook endpoint signing secret (`whsec_...`)
    pub stripe_webhook_secret: String,
    /// Anthropic API key
    pub anthropic_api_key: String,
    /// App Store shared secret for receipt validation
    pub apple_shared_secret: Option<String>,
    /// OAuth access token for the Android Publisher API
    pub google_play_access_token: Option<String>,
}

/// Mapping from app-store product ids to pass products.
#[derive(Debug, Clone, Default)]
pub struct IapProducts {
    pub nursing: Option<String>,
    pub general: Option<String>,
    pub annual: Option<String>,
}

impl IapProducts {
    pub fn pass_for(&self, product_id: &str) -> Option<PassType> {
        let matches = |configured: &Option<String>| configured.as_deref() == Some(product_id);
        if matches(&self.nursing) {
            Some(PassType::Nursing30Day)
        } else if matches(&self.general) {
            Some(PassType::General30Day)
        } else if matches(&self.annual) {
            Some(PassType::Annual)
        } else {
            None
        }
    }
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            google_play_package: "com.example.coach".to_string(),
            iap_products: IapProducts {
                nursing: Some("coach.nursing.30day".to_string()),
                general: Some("coach.general.30day".to_string()),
                annual: Some("coach.annual".to_string()),
            },
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            stripe_secret_key: "sk_test_123".to_string(),
            stripe_webhook_secret: "whsec_test_secret".to_string(),
            anthropic_api_key: "test_anthropic_key".to_string(),
            apple_shared_secret: None,
            google_play_access_token: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string()),
            google_play_package: env::var("GOOGLE_PLAY_PACKAGE").unwrap_or_default(),
            iap_products: IapProducts {
                nursing: optional("IAP_NURSING_PRODUCT_ID"),
                general: optional("IAP_GENERAL_PRODUCT_ID"),
                annual: optional("IAP_ANNUAL_PRODUCT_ID"),
            },

            jwt_signing_key: required("JWT_SIGNING_KEY")?.into_bytes(),
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            anthropic_api_key: required("ANTHROPIC_API_KEY")?,
            apple_shared_secret: optional("APPLE_SHARED_SECRET"),
            google_play_access_token: optional("GOOGLE_PLAY_ACCESS_TOKEN"),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
