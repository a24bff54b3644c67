// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe integration.
//!
//! Handles:
//! - Webhook signature verification (`Stripe-Signature` header)
//! - Event envelope parsing
//! - Checkout session creation (never retried automatically)

use crate::error::{AppError, Provider};
use crate::models::PassType;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook timestamp (seconds).
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Reasons a webhook payload is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing Stripe-Signature header")]
    MissingHeader,
    #[error("malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("no matching v1 signature")]
    Mismatch,
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        AppError::InvalidSignature(err.to_string())
    }
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Build a `Stripe-Signature` header value for a payload.
///
/// Used by tests and local tooling to produce signed fixtures.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        compute_signature(secret, timestamp, payload)
            .map(hex::encode)
            .unwrap_or_default()
    )
}

/// Verify a webhook payload against its `Stripe-Signature` header.
///
/// Header format: `t=<unix>,v1=<hex>[,v1=<hex>...][,v0=...]`. Any matching
/// `v1` entry is accepted (Stripe sends several during secret rotation).
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::MalformedHeader);
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                )
            }
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected =
        compute_signature(secret, timestamp, payload).ok_or(SignatureError::Mismatch)?;
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Stripe event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix timestamp of event creation
    pub created: i64,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkout sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub user_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// `None` means the recurring (legacy pro) subscription product
    pub pass_type: Option<PassType>,
    pub customer_id: Option<String>,
}

impl CheckoutRequest {
    /// Form fields for `POST /v1/checkout/sessions`.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mode = if self.pass_type.is_some() {
            "payment"
        } else {
            "subscription"
        };

        let mut fields = vec![
            ("mode".to_string(), mode.to_string()),
            ("line_items[0][price]".to_string(), self.price_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("client_reference_id".to_string(), self.user_id.clone()),
            ("metadata[user_id]".to_string(), self.user_id.clone()),
        ];

        if let Some(customer) = &self.customer_id {
            fields.push(("customer".to_string(), customer.clone()));
        }

        match self.pass_type {
            Some(pass) => {
                fields.push(("metadata[pass_type]".to_string(), pass.to_string()));
                // Charges inherit payment intent metadata; refunds correlate through it.
                fields.push((
                    "payment_intent_data[metadata][user_id]".to_string(),
                    self.user_id.clone(),
                ));
                fields.push((
                    "payment_intent_data[metadata][pass_type]".to_string(),
                    pass.to_string(),
                ));
            }
            None => {
                fields.push((
                    "subscription_data[metadata][user_id]".to_string(),
                    self.user_id.clone(),
                ));
            }
        }

        fields
    }
}

/// Created checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Stripe REST client.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, "https://api.stripe.com/v1".to_string())
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            secret_key,
        }
    }

    /// Create a hosted checkout session.
    ///
    /// Mutating call: a failure is reported to the caller, never re-submitted.
    pub async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError> {
        let url = format!("{}/checkout/sessions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&request.form_fields())
            .send()
            .await
            .map_err(|e| AppError::from_transport(Provider::Stripe, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::from_status(Provider::Stripe, status, &body));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| AppError::upstream(Provider::Stripe, format!("JSON parse error: {}", e)))?;

        tracing::info!(
            session_id = %session.id,
            user_id = %request.user_id,
            pass_type = ?request.pass_type,
            "Checkout session created"
        );

        Ok(session)
    }
}
