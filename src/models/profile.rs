// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User profile stored in Firestore.

use crate::models::tier::{PassType, PaymentChannel, SubscriptionStatus, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of applied provider event ids kept for replay detection.
pub const RECENT_EVENT_LIMIT: usize = 32;

/// Entitlement-relevant profile fields, one document per user.
///
/// Stored at `profiles/{user_id}`. The effective tier is never read from
/// `tier` alone; it is resolved from the expiry fields at request time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Auth subject (also used as document ID)
    pub user_id: String,
    /// Explicit/legacy tier
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub nursing_pass_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub general_pass_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annual_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub nursing_pass_channel: Option<PaymentChannel>,
    #[serde(default)]
    pub general_pass_channel: Option<PaymentChannel>,
    #[serde(default)]
    pub annual_channel: Option<PaymentChannel>,

    // ─── Recurring subscription (legacy pro) ─────────────────────
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    /// Creation time of the newest subscription event applied
    #[serde(default)]
    pub subscription_event_at: Option<DateTime<Utc>>,

    // ─── Mobile store purchases ──────────────────────────────────
    #[serde(default)]
    pub iap_original_transaction_id: Option<String>,

    // ─── Idempotency ─────────────────────────────────────────────
    /// Most recent provider event ids, oldest first
    #[serde(default)]
    pub recent_event_ids: Vec<String>,

    #[serde(default)]
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Fresh free-tier profile.
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: Tier::Free,
            nursing_pass_expires_at: None,
            general_pass_expires_at: None,
            annual_expires_at: None,
            nursing_pass_channel: None,
            general_pass_channel: None,
            annual_channel: None,
            subscription_status: SubscriptionStatus::None,
            subscription_id: None,
            stripe_customer_id: None,
            subscription_event_at: None,
            iap_original_transaction_id: None,
            recent_event_ids: Vec::new(),
            terms_accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expiry field for a pass product.
    pub fn pass_expiry(&self, pass: PassType) -> Option<DateTime<Utc>> {
        match pass {
            PassType::Nursing30Day => self.nursing_pass_expires_at,
            PassType::General30Day => self.general_pass_expires_at,
            PassType::Annual => self.annual_expires_at,
        }
    }

    /// Channel that last granted a pass product.
    pub fn pass_channel(&self, pass: PassType) -> Option<PaymentChannel> {
        match pass {
            PassType::Nursing30Day => self.nursing_pass_channel,
            PassType::General30Day => self.general_pass_channel,
            PassType::Annual => self.annual_channel,
        }
    }

    pub(crate) fn set_pass(
        &mut self,
        pass: PassType,
        expires_at: DateTime<Utc>,
        channel: PaymentChannel,
    ) {
        let (expiry, source) = match pass {
            PassType::Nursing30Day => (
                &mut self.nursing_pass_expires_at,
                &mut self.nursing_pass_channel,
            ),
            PassType::General30Day => (
                &mut self.general_pass_expires_at,
                &mut self.general_pass_channel,
            ),
            PassType::Annual => (&mut self.annual_expires_at, &mut self.annual_channel),
        };
        *expiry = Some(expires_at);
        *source = Some(channel);
    }

    pub(crate) fn set_pass_expiry(&mut self, pass: PassType, expires_at: DateTime<Utc>) {
        match pass {
            PassType::Nursing30Day => self.nursing_pass_expires_at = Some(expires_at),
            PassType::General30Day => self.general_pass_expires_at = Some(expires_at),
            PassType::Annual => self.annual_expires_at = Some(expires_at),
        }
    }

    /// Raise the stored tier, never lowering it.
    pub(crate) fn raise_tier(&mut self, tier: Tier) {
        if tier.rank() > self.tier.rank() {
            self.tier = tier;
        }
    }

    /// Note a pass grant in the stored tier.
    ///
    /// Pass entitlements live in the expiry fields; `pro` and `beta` are
    /// only ever cleared by a cancellation, so a pass never replaces them.
    pub(crate) fn note_pass_tier(&mut self, pass: PassType) {
        if !matches!(self.tier, Tier::Pro | Tier::Beta) {
            self.raise_tier(pass.tier());
        }
    }

    pub fn has_applied_event(&self, event_id: &str) -> bool {
        self.recent_event_ids.iter().any(|id| id == event_id)
    }

    pub(crate) fn record_event(&mut self, event_id: &str) {
        if self.has_applied_event(event_id) {
            return;
        }
        self.recent_event_ids.push(event_id.to_string());
        if self.recent_event_ids.len() > RECENT_EVENT_LIMIT {
            let excess = self.recent_event_ids.len() - RECENT_EVENT_LIMIT;
            self.recent_event_ids.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_recent_events_are_bounded() {
        let mut profile = UserProfile::new("user-1", now());
        for i in 0..(RECENT_EVENT_LIMIT + 5) {
            profile.record_event(&format!("evt_{}", i));
        }

        assert_eq!(profile.recent_event_ids.len(), RECENT_EVENT_LIMIT);
        assert!(!profile.has_applied_event("evt_0"));
        assert!(profile.has_applied_event(&format!("evt_{}", RECENT_EVENT_LIMIT + 4)));
    }

    #[test]
    fn test_record_event_ignores_duplicates() {
        let mut profile = UserProfile::new("user-1", now());
        profile.record_event("evt_a");
        profile.record_event("evt_a");
        assert_eq!(profile.recent_event_ids, vec!["evt_a".to_string()]);
    }

    #[test]
    fn test_raise_tier_never_lowers() {
        let mut profile = UserProfile::new("user-1", now());
        profile.raise_tier(Tier::Annual);
        profile.raise_tier(Tier::NursingPass);
        assert_eq!(profile.tier, Tier::Annual);
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let json = serde_json::json!({
            "user_id": "user-1",
            "created_at": "2026-03-01T12:00:00Z",
            "updated_at": "2026-03-01T12:00:00Z"
        });
        let profile: UserProfile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.tier, Tier::Free);
        assert_eq!(profile.subscription_status, SubscriptionStatus::None);
        assert!(profile.recent_event_ids.is_empty());
    }

    #[test]
    fn test_pass_does_not_replace_legacy_pro() {
        let mut profile = UserProfile::new("user-1", now());
        profile.tier = Tier::Pro;
        profile.note_pass_tier(PassType::Annual);
        assert_eq!(profile.tier, Tier::Pro);

        profile.tier = Tier::Free;
        profile.note_pass_tier(PassType::Nursing30Day);
        assert_eq!(profile.tier, Tier::NursingPass);
        profile.note_pass_tier(PassType::Annual);
        assert_eq!(profile.tier, Tier::Annual);
    }
}
