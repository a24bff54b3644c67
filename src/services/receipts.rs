// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mobile in-app purchase validation.
//!
//! Handles:
//! - App Store `verifyReceipt` (production, falling back to sandbox)
//! - Google Play Android Publisher purchase lookup
//! - Merging a verified purchase into the profile with the app-store channel

use crate::config::{Config, IapProducts};
use crate::error::{AppError, Provider};
use crate::models::{PassType, PaymentChannel, UserProfile};
use crate::services::reconcile::extend_expiry;
use crate::services::retry::{retry_transient, DEFAULT_ATTEMPTS};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const APPLE_PRODUCTION_URL: &str = "https://buy.itunes.apple.com/verifyReceipt";
const APPLE_SANDBOX_URL: &str = "https://sandbox.itunes.apple.com/verifyReceipt";
const GOOGLE_PUBLISHER_URL: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3";

/// Sandbox receipt sent to the production endpoint.
const APPLE_STATUS_SANDBOX_RECEIPT: i64 = 21007;

/// Store that issued a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Apple,
    Google,
}

impl Platform {
    pub fn channel(&self) -> PaymentChannel {
        match self {
            Platform::Apple => PaymentChannel::Apple,
            Platform::Google => PaymentChannel::Google,
        }
    }

    fn provider(&self) -> Provider {
        match self {
            Platform::Apple => Provider::AppStore,
            Platform::Google => Provider::GooglePlay,
        }
    }
}

/// A purchase the store confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPurchase {
    pub platform: Platform,
    pub product_id: String,
    pub pass_type: PassType,
    /// Store transaction id (idempotency key for this purchase)
    pub transaction_id: String,
    pub original_transaction_id: Option<String>,
    /// Store-side expiry for auto-renewing products
    pub store_expires_at: Option<DateTime<Utc>>,
}

impl VerifiedPurchase {
    /// Key recorded in the profile's applied-event list.
    pub fn event_key(&self) -> String {
        let prefix = match self.platform {
            Platform::Apple => "apple",
            Platform::Google => "google",
        };
        format!("{}:{}", prefix, self.transaction_id)
    }
}

/// Merge a verified purchase into the profile.
///
/// Returns `None` when this transaction was already applied. Store-managed
/// expiries are taken as-is unless the profile already runs longer; passes
/// without one follow the same renewal rule as web checkout.
pub fn apply_receipt(
    current: Option<UserProfile>,
    user_id: &str,
    purchase: &VerifiedPurchase,
    now: DateTime<Utc>,
) -> Option<UserProfile> {
    let event_key = purchase.event_key();
    if current
        .as_ref()
        .is_some_and(|p| p.has_applied_event(&event_key))
    {
        return None;
    }

    let mut profile = current.unwrap_or_else(|| UserProfile::new(user_id, now));
    let pass = purchase.pass_type;
    let existing = profile.pass_expiry(pass);

    let expires_at = match purchase.store_expires_at {
        Some(store) => existing.map_or(store, |e| e.max(store)),
        None => extend_expiry(existing, now, pass),
    };

    profile.set_pass(pass, expires_at, purchase.platform.channel());
    profile.note_pass_tier(pass);
    if let Some(original) = &purchase.original_transaction_id {
        profile.iap_original_transaction_id = Some(original.clone());
    }
    profile.record_event(&event_key);
    profile.updated_at = now;

    Some(profile)
}

// ─────────────────────────────────────────────────────────────────────────────
// Response parsing
// ─────────────────────────────────────────────────────────────────────────────

fn millis_field(entry: &Value, key: &str) -> Option<i64> {
    match entry.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn map_product(products: &IapProducts, product_id: &str) -> Result<PassType, AppError> {
    products
        .pass_for(product_id)
        .ok_or_else(|| AppError::BadRequest(format!("unknown product: {}", product_id)))
}

/// Extract the newest purchase from a successful `verifyReceipt` body.
pub fn parse_apple_response(
    body: &Value,
    products: &IapProducts,
    now: DateTime<Utc>,
) -> Result<VerifiedPurchase, AppError> {
    let entries = body
        .get("latest_receipt_info")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .or_else(|| body.pointer("/receipt/in_app").and_then(Value::as_array))
        .ok_or_else(|| AppError::BadRequest("receipt contains no purchases".to_string()))?;

    let newest = entries
        .iter()
        .max_by_key(|entry| millis_field(entry, "purchase_date_ms").unwrap_or(0))
        .ok_or_else(|| AppError::BadRequest("receipt contains no purchases".to_string()))?;

    let product_id = newest
        .get("product_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("purchase without product_id".to_string()))?;
    let pass_type = map_product(products, product_id)?;

    let transaction_id = newest
        .get("transaction_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("purchase without transaction_id".to_string()))?;

    let store_expires_at = millis_field(newest, "expires_date_ms").and_then(millis_to_datetime);
    if store_expires_at.is_some_and(|expiry| expiry <= now) {
        return Err(AppError::BadRequest("purchase has expired".to_string()));
    }

    Ok(VerifiedPurchase {
        platform: Platform::Apple,
        product_id: product_id.to_string(),
        pass_type,
        transaction_id: transaction_id.to_string(),
        original_transaction_id: newest
            .get("original_transaction_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        store_expires_at,
    })
}

/// Receipt blob the Android client sends (raw JSON or base64 JSON).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleReceipt {
    pub package_name: String,
    pub product_id: String,
    pub purchase_token: String,
}

pub fn decode_google_receipt(blob: &str) -> Result<GoogleReceipt, AppError> {
    let blob = blob.trim();
    let json = if blob.starts_with('{') {
        blob.as_bytes().to_vec()
    } else {
        STANDARD
            .decode(blob)
            .map_err(|_| AppError::BadRequest("receipt is neither JSON nor base64".to_string()))?
    };

    serde_json::from_slice(&json)
        .map_err(|e| AppError::BadRequest(format!("malformed Google receipt: {}", e)))
}

/// Validate an Android Publisher purchase resource.
pub fn parse_google_purchase(
    receipt: &GoogleReceipt,
    pass_type: PassType,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<VerifiedPurchase, AppError> {
    let store_expires_at = millis_field(body, "expiryTimeMillis").and_then(millis_to_datetime);

    let valid = match store_expires_at {
        Some(expiry) => expiry > now,
        None => body.get("purchaseState").and_then(Value::as_i64) == Some(0),
    };
    if !valid {
        return Err(AppError::BadRequest(
            "purchase is not in a purchased state".to_string(),
        ));
    }

    let transaction_id = body
        .get("orderId")
        .and_then(Value::as_str)
        .unwrap_or(&receipt.purchase_token)
        .to_string();

    Ok(VerifiedPurchase {
        platform: Platform::Google,
        product_id: receipt.product_id.clone(),
        pass_type,
        transaction_id,
        original_transaction_id: Some(receipt.purchase_token.clone()),
        store_expires_at,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Store client
// ─────────────────────────────────────────────────────────────────────────────

/// Verifies receipts against the App Store and Google Play.
#[derive(Clone)]
pub struct ReceiptVerifier {
    http: reqwest::Client,
    apple_production_url: String,
    apple_sandbox_url: String,
    google_base_url: String,
    apple_shared_secret: Option<String>,
    google_access_token: Option<String>,
    google_package: String,
    products: IapProducts,
}

impl ReceiptVerifier {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            apple_production_url: APPLE_PRODUCTION_URL.to_string(),
            apple_sandbox_url: APPLE_SANDBOX_URL.to_string(),
            google_base_url: GOOGLE_PUBLISHER_URL.to_string(),
            apple_shared_secret: config.apple_shared_secret.clone(),
            google_access_token: config.google_play_access_token.clone(),
            google_package: config.google_play_package.clone(),
            products: config.iap_products.clone(),
        }
    }

    /// Point the verifier at other endpoints (local stubs).
    pub fn with_endpoints(
        mut self,
        apple_production_url: String,
        apple_sandbox_url: String,
        google_base_url: String,
    ) -> Self {
        self.apple_production_url = apple_production_url;
        self.apple_sandbox_url = apple_sandbox_url;
        self.google_base_url = google_base_url;
        self
    }

    pub async fn verify(
        &self,
        platform: Platform,
        receipt: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPurchase, AppError> {
        let result = match platform {
            Platform::Apple => self.verify_apple(receipt, now).await,
            Platform::Google => self.verify_google(receipt, now).await,
        };
        let purchase = result.inspect_err(|e| {
            tracing::warn!(provider = %platform.provider(), error = %e, "Receipt verification failed");
        })?;

        tracing::info!(
            platform = ?platform,
            product_id = %purchase.product_id,
            pass_type = %purchase.pass_type,
            "Receipt verified"
        );

        Ok(purchase)
    }

    async fn post_apple(&self, url: &str, body: &Value) -> Result<Value, AppError> {
        let http = &self.http;
        retry_transient("apple_verify_receipt", DEFAULT_ATTEMPTS, move || async move {
            let response = http
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| AppError::from_transport(Provider::AppStore, e))?;

            check_json(Provider::AppStore, response).await
        })
        .await
    }

    async fn verify_apple(
        &self,
        receipt: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPurchase, AppError> {
        let mut request = serde_json::json!({
            "receipt-data": receipt,
            "exclude-old-transactions": true,
        });
        if let Some(secret) = &self.apple_shared_secret {
            request["password"] = Value::String(secret.clone());
        }

        let mut body = self.post_apple(&self.apple_production_url, &request).await?;
        let mut status = body.get("status").and_then(Value::as_i64).unwrap_or(-1);

        if status == APPLE_STATUS_SANDBOX_RECEIPT {
            tracing::debug!("Sandbox receipt, retrying against sandbox endpoint");
            body = self.post_apple(&self.apple_sandbox_url, &request).await?;
            status = body.get("status").and_then(Value::as_i64).unwrap_or(-1);
        }

        match status {
            0 => parse_apple_response(&body, &self.products, now),
            // 21005 and 21100-21199 are App Store internal errors
            21005 | 21100..=21199 => Err(AppError::upstream_transient(
                Provider::AppStore,
                format!("verifyReceipt status {}", status),
            )),
            other => Err(AppError::BadRequest(format!(
                "receipt rejected by App Store (status {})",
                other
            ))),
        }
    }

    async fn verify_google(
        &self,
        blob: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPurchase, AppError> {
        let receipt = decode_google_receipt(blob)?;
        if receipt.package_name != self.google_package {
            return Err(AppError::BadRequest(format!(
                "receipt for unexpected package {}",
                receipt.package_name
            )));
        }

        let pass_type = map_product(&self.products, &receipt.product_id)?;
        let token = self.google_access_token.as_deref().ok_or_else(|| {
            AppError::upstream(Provider::GooglePlay, "receipt validation not configured")
        })?;

        let kind = match pass_type {
            PassType::Annual => "subscriptions",
            PassType::Nursing30Day | PassType::General30Day => "products",
        };
        let url = format!(
            "{}/applications/{}/purchases/{}/{}/tokens/{}",
            self.google_base_url,
            urlencoding::encode(&receipt.package_name),
            kind,
            urlencoding::encode(&receipt.product_id),
            urlencoding::encode(&receipt.purchase_token),
        );

        let http = &self.http;
        let url = url.as_str();
        let body: Value = retry_transient("google_purchase_lookup", DEFAULT_ATTEMPTS, move || async move {
            let response = http
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| AppError::from_transport(Provider::GooglePlay, e))?;

            check_json(Provider::GooglePlay, response).await
        })
        .await?;

        parse_google_purchase(&receipt, pass_type, &body, now)
    }
}

async fn check_json(provider: Provider, response: reqwest::Response) -> Result<Value, AppError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::from_status(provider, status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::upstream(provider, format!("JSON parse error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn products() -> IapProducts {
        Config::test_default().iap_products
    }

    fn apple_purchase(pass_type: PassType, transaction_id: &str) -> VerifiedPurchase {
        VerifiedPurchase {
            platform: Platform::Apple,
            product_id: "coach.nursing.30day".to_string(),
            pass_type,
            transaction_id: transaction_id.to_string(),
            original_transaction_id: Some("1000".to_string()),
            store_expires_at: None,
        }
    }

    #[test]
    fn test_apple_newest_entry_wins() {
        let body = json!({
            "status": 0,
            "latest_receipt_info": [
                { "product_id": "coach.general.30day", "transaction_id": "1", "purchase_date_ms": "1000" },
                { "product_id": "coach.nursing.30day", "transaction_id": "2",
                  "original_transaction_id": "1", "purchase_date_ms": "2000" }
            ]
        });

        let purchase = parse_apple_response(&body, &products(), now()).unwrap();
        assert_eq!(purchase.pass_type, PassType::Nursing30Day);
        assert_eq!(purchase.transaction_id, "2");
        assert_eq!(purchase.original_transaction_id.as_deref(), Some("1"));
        assert_eq!(purchase.event_key(), "apple:2");
    }

    #[test]
    fn test_apple_unknown_product_rejected() {
        let body = json!({
            "status": 0,
            "receipt": { "in_app": [{ "product_id": "coach.coins", "transaction_id": "9" }] }
        });
        assert!(matches!(
            parse_apple_response(&body, &products(), now()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_apple_expired_subscription_rejected() {
        let expired = (now() - Duration::days(1)).timestamp_millis().to_string();
        let body = json!({
            "status": 0,
            "latest_receipt_info": [
                { "product_id": "coach.annual", "transaction_id": "5", "expires_date_ms": expired }
            ]
        });
        assert!(parse_apple_response(&body, &products(), now()).is_err());
    }

    #[test]
    fn test_google_receipt_json_or_base64() {
        let raw = r#"{"packageName":"com.example.coach","productId":"coach.general.30day","purchaseToken":"tok"}"#;
        let from_json = decode_google_receipt(raw).unwrap();
        let from_b64 = decode_google_receipt(&STANDARD.encode(raw)).unwrap();
        assert_eq!(from_json, from_b64);
        assert_eq!(from_json.purchase_token, "tok");

        assert!(decode_google_receipt("not a receipt!").is_err());
    }

    #[test]
    fn test_google_purchase_state() {
        let receipt = GoogleReceipt {
            package_name: "com.example.coach".to_string(),
            product_id: "coach.general.30day".to_string(),
            purchase_token: "tok".to_string(),
        };

        let ok = json!({ "purchaseState": 0, "orderId": "GPA.1" });
        let purchase = parse_google_purchase(&receipt, PassType::General30Day, &ok, now()).unwrap();
        assert_eq!(purchase.event_key(), "google:GPA.1");
        assert_eq!(purchase.platform.channel(), PaymentChannel::Google);

        let cancelled = json!({ "purchaseState": 1, "orderId": "GPA.2" });
        assert!(parse_google_purchase(&receipt, PassType::General30Day, &cancelled, now()).is_err());

        let future = (now() + Duration::days(300)).timestamp_millis().to_string();
        let subscription = json!({ "expiryTimeMillis": future, "orderId": "GPA.3" });
        let purchase =
            parse_google_purchase(&receipt, PassType::Annual, &subscription, now()).unwrap();
        assert_eq!(purchase.store_expires_at, Some(now() + Duration::days(300)));
    }

    #[test]
    fn test_apply_receipt_records_store_channel() {
        let profile = apply_receipt(
            None,
            "user-1",
            &apple_purchase(PassType::Nursing30Day, "t1"),
            now(),
        )
        .unwrap();

        assert_eq!(profile.nursing_pass_expires_at, Some(now() + Duration::days(30)));
        assert_eq!(profile.nursing_pass_channel, Some(PaymentChannel::Apple));
        assert_eq!(profile.iap_original_transaction_id.as_deref(), Some("1000"));
        assert_eq!(profile.stripe_customer_id, None);
    }

    #[test]
    fn test_apply_receipt_is_idempotent_per_transaction() {
        let purchase = apple_purchase(PassType::Nursing30Day, "t1");
        let profile = apply_receipt(None, "user-1", &purchase, now()).unwrap();

        assert!(apply_receipt(Some(profile.clone()), "user-1", &purchase, now()).is_none());

        let renewed = apply_receipt(
            Some(profile),
            "user-1",
            &apple_purchase(PassType::Nursing30Day, "t2"),
            now(),
        )
        .unwrap();
        assert_eq!(renewed.nursing_pass_expires_at, Some(now() + Duration::days(60)));
    }

    #[test]
    fn test_receipt_keeps_legacy_pro() {
        use crate::models::{FeatureDomain, Tier};
        use crate::services::entitlement::resolve_tier;

        let mut profile = UserProfile::new("user-1", now() - Duration::days(400));
        profile.tier = Tier::Pro;

        let updated = apply_receipt(
            Some(profile),
            "user-1",
            &apple_purchase(PassType::Nursing30Day, "t9"),
            now(),
        )
        .unwrap();

        assert_eq!(updated.tier, Tier::Pro);
        assert_eq!(
            resolve_tier(Some(&updated), false, FeatureDomain::General, now()),
            Tier::Pro
        );
        assert_eq!(
            resolve_tier(Some(&updated), false, FeatureDomain::Nursing, now()),
            Tier::NursingPass
        );
    }

    #[test]
    fn test_store_expiry_never_shortens_pass() {
        let mut profile = UserProfile::new("user-1", now());
        profile.annual_expires_at = Some(now() + Duration::days(400));

        let mut purchase = apple_purchase(PassType::Annual, "t3");
        purchase.store_expires_at = Some(now() + Duration::days(365));

        let updated = apply_receipt(Some(profile), "user-1", &purchase, now()).unwrap();
        assert_eq!(updated.annual_expires_at, Some(now() + Duration::days(400)));
    }

    #[tokio::test]
    async fn test_apple_sandbox_fallback() {
        let app = Router::new()
            .route(
                "/production",
                post(|| async { Json(json!({ "status": 21007 })) }),
            )
            .route(
                "/sandbox",
                post(|| async {
                    Json(json!({
                        "status": 0,
                        "latest_receipt_info": [
                            { "product_id": "coach.general.30day", "transaction_id": "77" }
                        ]
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{}", addr);
        let verifier = ReceiptVerifier::new(&Config::test_default()).with_endpoints(
            format!("{}/production", base),
            format!("{}/sandbox", base),
            base.clone(),
        );

        let purchase = verifier
            .verify(Platform::Apple, "receipt-data", now())
            .await
            .unwrap();
        assert_eq!(purchase.pass_type, PassType::General30Day);
        assert_eq!(purchase.transaction_id, "77");
    }
}
