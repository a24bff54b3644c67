// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Payment webhook reconciliation.
//!
//! Provider events are decoded into [`EntitlementEvent`]s and merged into the
//! user's profile by [`apply_event`], a pure function. The merge is
//! idempotent (replayed event ids are no-ops) and tolerant of out-of-order
//! delivery (subscription events older than the newest applied one are
//! dropped). [`ReconcileService`] correlates events to users and runs the
//! merge inside a Firestore transaction.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{PassType, PaymentChannel, SubscriptionStatus, Tier, UserProfile};
use crate::services::stripe::StripeEvent;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Ways an event can identify its user, strongest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRef {
    pub user_id: Option<String>,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
}

/// Entitlement-relevant facts decoded from a provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementEvent {
    /// Checkout paid. `pass_type == None` is the recurring pro subscription.
    CheckoutCompleted {
        user: UserRef,
        pass_type: Option<PassType>,
    },
    SubscriptionUpdated {
        user: UserRef,
        status: SubscriptionStatus,
    },
    SubscriptionDeleted {
        user: UserRef,
    },
    PaymentFailed {
        user: UserRef,
    },
    PaymentSucceeded {
        user: UserRef,
    },
    ChargeRefunded {
        user: UserRef,
        pass_type: Option<PassType>,
        fully_refunded: bool,
    },
    /// Event type this service does not act on
    Unhandled(String),
}

impl EntitlementEvent {
    pub fn user_ref(&self) -> Option<&UserRef> {
        match self {
            EntitlementEvent::CheckoutCompleted { user, .. }
            | EntitlementEvent::SubscriptionUpdated { user, .. }
            | EntitlementEvent::SubscriptionDeleted { user }
            | EntitlementEvent::PaymentFailed { user }
            | EntitlementEvent::PaymentSucceeded { user }
            | EntitlementEvent::ChargeRefunded { user, .. } => Some(user),
            EntitlementEvent::Unhandled(_) => None,
        }
    }
}

/// Immutable external fact with its identity and creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub id: String,
    pub created: DateTime<Utc>,
    pub kind: EntitlementEvent,
}

fn str_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Expandable Stripe reference: either an id string or an object with `id`.
fn ref_field(object: &Value, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(inner) => inner.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn metadata(object: &Value, key: &str) -> Option<String> {
    object.get("metadata").and_then(|m| str_field(m, key))
}

fn pass_type_from(object: &Value) -> Result<Option<PassType>, AppError> {
    metadata(object, "pass_type")
        .map(|raw| raw.parse::<PassType>().map_err(AppError::BadRequest))
        .transpose()
}

/// Subscription id on an invoice (top level on older API versions).
fn invoice_subscription(object: &Value) -> Option<String> {
    ref_field(object, "subscription").or_else(|| {
        object
            .pointer("/parent/subscription_details/subscription")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

impl ProviderEvent {
    /// Decode a Stripe event.
    ///
    /// Unknown event types decode to [`EntitlementEvent::Unhandled`]; a known
    /// type with an unusable payload is a validation error.
    pub fn from_stripe(event: &StripeEvent) -> Result<Self, AppError> {
        let object = &event.data.object;
        let created = DateTime::from_timestamp(event.created, 0).ok_or_else(|| {
            AppError::BadRequest(format!("invalid event timestamp {}", event.created))
        })?;

        let kind = match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let payment_status = str_field(object, "payment_status");
                if payment_status.as_deref() == Some("unpaid") {
                    // Delayed payment methods complete later via async_payment_succeeded.
                    EntitlementEvent::Unhandled(format!("{} (unpaid)", event.event_type))
                } else {
                    EntitlementEvent::CheckoutCompleted {
                        user: UserRef {
                            user_id: metadata(object, "user_id")
                                .or_else(|| str_field(object, "client_reference_id")),
                            subscription_id: ref_field(object, "subscription"),
                            customer_id: ref_field(object, "customer"),
                        },
                        pass_type: pass_type_from(object)?,
                    }
                }
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                let status = str_field(object, "status").ok_or_else(|| {
                    AppError::BadRequest("subscription event without status".to_string())
                })?;
                EntitlementEvent::SubscriptionUpdated {
                    user: subscription_user(object),
                    status: SubscriptionStatus::from_stripe(&status),
                }
            }
            "customer.subscription.deleted" => EntitlementEvent::SubscriptionDeleted {
                user: subscription_user(object),
            },
            "invoice.payment_failed" => EntitlementEvent::PaymentFailed {
                user: invoice_user(object),
            },
            "invoice.payment_succeeded" | "invoice.paid" => EntitlementEvent::PaymentSucceeded {
                user: invoice_user(object),
            },
            "charge.refunded" => EntitlementEvent::ChargeRefunded {
                user: UserRef {
                    user_id: metadata(object, "user_id"),
                    subscription_id: None,
                    customer_id: ref_field(object, "customer"),
                },
                pass_type: pass_type_from(object)?,
                // Only an explicit `refunded: false` marks a partial refund.
                fully_refunded: object
                    .get("refunded")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            },
            other => EntitlementEvent::Unhandled(other.to_string()),
        };

        Ok(Self {
            id: event.id.clone(),
            created,
            kind,
        })
    }
}

fn subscription_user(object: &Value) -> UserRef {
    UserRef {
        user_id: metadata(object, "user_id"),
        subscription_id: str_field(object, "id"),
        customer_id: ref_field(object, "customer"),
    }
}

fn invoice_user(object: &Value) -> UserRef {
    UserRef {
        user_id: None,
        subscription_id: invoice_subscription(object),
        customer_id: ref_field(object, "customer"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure merge
// ─────────────────────────────────────────────────────────────────────────────

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Event id already applied
    Duplicate,
    /// Older than the newest applied subscription event
    Stale,
    /// Acknowledged without mutation
    Ignored(&'static str),
    /// No profile could be correlated
    UnknownUser,
}

/// Result of merging one event into a profile snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Profile to persist; `None` means "write nothing"
    pub profile: Option<UserProfile>,
    pub outcome: Outcome,
}

impl Reconciliation {
    fn unchanged(outcome: Outcome) -> Self {
        Self {
            profile: None,
            outcome,
        }
    }
}

/// Renewal rule: extend from the current expiry if still active, else from now.
pub fn extend_expiry(
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    pass: PassType,
) -> DateTime<Utc> {
    current.map_or(now, |expiry| expiry.max(now)) + pass.duration()
}

fn is_stale(profile: &UserProfile, created: DateTime<Utc>) -> bool {
    profile
        .subscription_event_at
        .is_some_and(|newest| created < newest)
}

fn fill_refs(profile: &mut UserProfile, user: &UserRef) {
    if let Some(customer) = &user.customer_id {
        profile.stripe_customer_id = Some(customer.clone());
    }
    if let Some(subscription) = &user.subscription_id {
        profile.subscription_id = Some(subscription.clone());
    }
}

/// Merge an event into the stored profile for `user_id`.
///
/// Pure: the caller persists `profile` when one is returned.
pub fn apply_event(
    current: Option<UserProfile>,
    user_id: &str,
    event: &ProviderEvent,
    now: DateTime<Utc>,
) -> Reconciliation {
    if current
        .as_ref()
        .is_some_and(|p| p.has_applied_event(&event.id))
    {
        return Reconciliation::unchanged(Outcome::Duplicate);
    }

    // Events that may create the profile (first contact can be a webhook).
    let creates_profile = matches!(
        event.kind,
        EntitlementEvent::CheckoutCompleted { .. }
            | EntitlementEvent::SubscriptionUpdated { .. }
            | EntitlementEvent::SubscriptionDeleted { .. }
    );

    let mut profile = match current {
        Some(profile) => profile,
        None if creates_profile => UserProfile::new(user_id, now),
        None => return Reconciliation::unchanged(Outcome::UnknownUser),
    };

    let outcome = match &event.kind {
        EntitlementEvent::CheckoutCompleted {
            user,
            pass_type: Some(pass),
        } => {
            let new_expiry = extend_expiry(profile.pass_expiry(*pass), now, *pass);
            profile.set_pass(*pass, new_expiry, PaymentChannel::Stripe);
            profile.note_pass_tier(*pass);
            if let Some(customer) = &user.customer_id {
                profile.stripe_customer_id = Some(customer.clone());
            }
            Outcome::Applied
        }
        EntitlementEvent::CheckoutCompleted {
            user,
            pass_type: None,
        } => {
            fill_refs(&mut profile, user);
            // A later cancellation already applied wins over a delayed checkout.
            if !is_stale(&profile, event.created) {
                profile.raise_tier(Tier::Pro);
                profile.subscription_status = SubscriptionStatus::Active;
                profile.subscription_event_at = Some(event.created);
            }
            Outcome::Applied
        }
        EntitlementEvent::SubscriptionUpdated { user, status } => {
            if is_stale(&profile, event.created) {
                Outcome::Stale
            } else {
                fill_refs(&mut profile, user);
                profile.subscription_status = *status;
                profile.subscription_event_at = Some(event.created);
                match status {
                    SubscriptionStatus::Active => profile.raise_tier(Tier::Pro),
                    SubscriptionStatus::Canceled if profile.tier == Tier::Pro => {
                        profile.tier = Tier::Free
                    }
                    _ => {}
                }
                Outcome::Applied
            }
        }
        EntitlementEvent::SubscriptionDeleted { user } => {
            if is_stale(&profile, event.created) {
                Outcome::Stale
            } else {
                fill_refs(&mut profile, user);
                profile.subscription_status = SubscriptionStatus::Canceled;
                profile.subscription_event_at = Some(event.created);
                // Legacy subscription loses access now; passes run to expiry.
                if profile.tier == Tier::Pro {
                    profile.tier = Tier::Free;
                }
                Outcome::Applied
            }
        }
        EntitlementEvent::PaymentFailed { .. } => {
            if is_stale(&profile, event.created) {
                Outcome::Stale
            } else if profile.subscription_status == SubscriptionStatus::Active {
                // Grace period: status only, entitlement untouched.
                profile.subscription_status = SubscriptionStatus::PastDue;
                profile.subscription_event_at = Some(event.created);
                Outcome::Applied
            } else {
                Outcome::Ignored("subscription not active")
            }
        }
        EntitlementEvent::PaymentSucceeded { .. } => {
            if is_stale(&profile, event.created) {
                Outcome::Stale
            } else if matches!(
                profile.subscription_status,
                SubscriptionStatus::PastDue | SubscriptionStatus::None
            ) && profile.subscription_id.is_some()
            {
                profile.subscription_status = SubscriptionStatus::Active;
                profile.subscription_event_at = Some(event.created);
                Outcome::Applied
            } else {
                Outcome::Ignored("no status change")
            }
        }
        EntitlementEvent::ChargeRefunded {
            pass_type,
            fully_refunded,
            ..
        } => match pass_type {
            None => Outcome::Ignored("refund without pass type"),
            Some(_) if !fully_refunded => Outcome::Ignored("partial refund"),
            Some(pass) => match (profile.pass_expiry(*pass), profile.pass_channel(*pass)) {
                (None, _) => Outcome::Ignored("no pass to revoke"),
                (Some(_), Some(channel)) if channel != PaymentChannel::Stripe => {
                    Outcome::Ignored("pass granted by another channel")
                }
                (Some(expiry), _) => {
                    profile.set_pass_expiry(*pass, expiry.min(now));
                    if profile.tier == pass.tier() {
                        profile.tier = Tier::Free;
                    }
                    Outcome::Applied
                }
            },
        },
        EntitlementEvent::Unhandled(_) => Outcome::Ignored("unhandled event type"),
    };

    if outcome != Outcome::Applied {
        return Reconciliation::unchanged(outcome);
    }

    profile.record_event(&event.id);
    profile.updated_at = now;

    Reconciliation {
        profile: Some(profile),
        outcome,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReconcileService - correlation and persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Applies verified provider events to stored profiles.
#[derive(Clone)]
pub struct ReconcileService {
    db: FirestoreDb,
}

impl ReconcileService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Find the user an event refers to.
    async fn correlate(&self, user: &UserRef) -> Result<Option<String>, AppError> {
        if let Some(user_id) = &user.user_id {
            return Ok(Some(user_id.clone()));
        }

        if let Some(subscription_id) = &user.subscription_id {
            if let Some(profile) = self.db.find_profile_by_subscription(subscription_id).await? {
                return Ok(Some(profile.user_id));
            }
        }

        if let Some(customer_id) = &user.customer_id {
            if let Some(profile) = self.db.find_profile_by_customer(customer_id).await? {
                return Ok(Some(profile.user_id));
            }
        }

        Ok(None)
    }

    /// Decode, correlate and apply one verified Stripe event.
    pub async fn handle(&self, event: &StripeEvent) -> Result<Outcome, AppError> {
        let parsed = ProviderEvent::from_stripe(event)?;

        let Some(user) = parsed.kind.user_ref() else {
            tracing::debug!(
                event_id = %parsed.id,
                event_type = %event.event_type,
                "Ignoring unhandled event type"
            );
            return Ok(Outcome::Ignored("unhandled event type"));
        };

        let Some(user_id) = self.correlate(user).await? else {
            tracing::warn!(
                event_id = %parsed.id,
                event_type = %event.event_type,
                subscription_id = ?user.subscription_id,
                customer_id = ?user.customer_id,
                "Webhook event references unknown user"
            );
            return Ok(Outcome::UnknownUser);
        };

        let now = Utc::now();
        let target = user_id.clone();
        let outcome = self
            .db
            .reconcile_profile(&user_id, move |current| {
                let reconciliation = apply_event(current, &target, &parsed, now);
                (reconciliation.profile, reconciliation.outcome)
            })
            .await?;

        match outcome {
            Outcome::Applied => tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                user_id = %user_id,
                "Entitlement event applied"
            ),
            Outcome::UnknownUser => tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                user_id = %user_id,
                "No profile for event, nothing to update"
            ),
            other => tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                user_id = %user_id,
                outcome = ?other,
                "Entitlement event acknowledged without change"
            ),
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureDomain;
    use crate::services::entitlement::resolve_tier;
    use crate::services::stripe::StripeEventData;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn stripe_event(id: &str, event_type: &str, created: DateTime<Utc>, object: Value) -> StripeEvent {
        StripeEvent {
            id: id.to_string(),
            event_type: event_type.to_string(),
            created: created.timestamp(),
            data: StripeEventData { object },
        }
    }

    fn checkout(id: &str, pass_type: Option<&str>, created: DateTime<Utc>) -> ProviderEvent {
        let mut metadata = json!({ "user_id": "user-1" });
        if let Some(pass) = pass_type {
            metadata["pass_type"] = json!(pass);
        }
        let (mode, subscription) = match pass_type {
            Some(_) => ("payment", Value::Null),
            None => ("subscription", json!("sub_1")),
        };
        let event = stripe_event(
            id,
            "checkout.session.completed",
            created,
            json!({
                "id": "cs_1",
                "mode": mode,
                "payment_status": "paid",
                "customer": "cus_1",
                "subscription": subscription,
                "metadata": metadata,
            }),
        );
        ProviderEvent::from_stripe(&event).unwrap()
    }

    fn subscription_event(
        id: &str,
        event_type: &str,
        status: &str,
        created: DateTime<Utc>,
    ) -> ProviderEvent {
        let event = stripe_event(
            id,
            event_type,
            created,
            json!({ "id": "sub_1", "customer": "cus_1", "status": status }),
        );
        ProviderEvent::from_stripe(&event).unwrap()
    }

    fn refund(id: &str, pass_type: &str, refunded: Option<bool>) -> ProviderEvent {
        let mut charge = json!({
            "id": "ch_1",
            "customer": "cus_1",
            "metadata": { "user_id": "user-1", "pass_type": pass_type },
        });
        if let Some(refunded) = refunded {
            charge["refunded"] = json!(refunded);
        }
        let event = stripe_event(id, "charge.refunded", now(), charge);
        ProviderEvent::from_stripe(&event).unwrap()
    }

    fn apply(profile: Option<UserProfile>, event: &ProviderEvent, at: DateTime<Utc>) -> Reconciliation {
        apply_event(profile, "user-1", event, at)
    }

    fn applied(profile: Option<UserProfile>, event: &ProviderEvent, at: DateTime<Utc>) -> UserProfile {
        let result = apply(profile, event, at);
        assert_eq!(result.outcome, Outcome::Applied);
        result.profile.expect("applied event returns a profile")
    }

    // ─── Decoding ────────────────────────────────────────────────

    #[test]
    fn test_decode_checkout_uses_client_reference_fallback() {
        let event = stripe_event(
            "evt_1",
            "checkout.session.completed",
            now(),
            json!({ "client_reference_id": "user-9", "customer": "cus_9", "payment_status": "paid" }),
        );
        let parsed = ProviderEvent::from_stripe(&event).unwrap();
        match parsed.kind {
            EntitlementEvent::CheckoutCompleted { user, pass_type } => {
                assert_eq!(user.user_id.as_deref(), Some("user-9"));
                assert_eq!(user.customer_id.as_deref(), Some("cus_9"));
                assert_eq!(pass_type, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_unhandled() {
        let event = stripe_event("evt_1", "customer.tax_id.created", now(), json!({}));
        let parsed = ProviderEvent::from_stripe(&event).unwrap();
        assert_eq!(
            parsed.kind,
            EntitlementEvent::Unhandled("customer.tax_id.created".to_string())
        );
        assert!(parsed.kind.user_ref().is_none());
    }

    #[test]
    fn test_decode_unknown_pass_type_is_error() {
        let event = stripe_event(
            "evt_1",
            "checkout.session.completed",
            now(),
            json!({ "metadata": { "user_id": "u", "pass_type": "lifetime" } }),
        );
        assert!(matches!(
            ProviderEvent::from_stripe(&event),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_decode_invoice_subscription_from_parent() {
        let event = stripe_event(
            "evt_1",
            "invoice.payment_failed",
            now(),
            json!({
                "customer": "cus_1",
                "parent": { "subscription_details": { "subscription": "sub_77" } }
            }),
        );
        let parsed = ProviderEvent::from_stripe(&event).unwrap();
        assert_eq!(
            parsed.kind.user_ref().unwrap().subscription_id.as_deref(),
            Some("sub_77")
        );
    }

    #[test]
    fn test_unpaid_checkout_is_not_applied() {
        let event = stripe_event(
            "evt_1",
            "checkout.session.completed",
            now(),
            json!({ "payment_status": "unpaid", "metadata": { "user_id": "user-1", "pass_type": "nursing_30day" } }),
        );
        let parsed = ProviderEvent::from_stripe(&event).unwrap();
        assert!(matches!(parsed.kind, EntitlementEvent::Unhandled(_)));
    }

    // ─── Passes ──────────────────────────────────────────────────

    #[test]
    fn test_checkout_creates_profile_with_pass() {
        let profile = applied(None, &checkout("evt_1", Some("nursing_30day"), now()), now());

        assert_eq!(profile.user_id, "user-1");
        assert_eq!(profile.nursing_pass_expires_at, Some(now() + Duration::days(30)));
        assert_eq!(profile.nursing_pass_channel, Some(PaymentChannel::Stripe));
        assert_eq!(profile.general_pass_expires_at, None);
        assert_eq!(profile.tier, Tier::NursingPass);
        assert_eq!(profile.stripe_customer_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn test_replayed_checkout_does_not_double_extend() {
        let event = checkout("evt_1", Some("nursing_30day"), now());
        let once = applied(None, &event, now());

        let replay = apply(Some(once.clone()), &event, now() + Duration::hours(1));
        assert_eq!(replay.outcome, Outcome::Duplicate);
        assert!(replay.profile.is_none());
        assert_eq!(once.nursing_pass_expires_at, Some(now() + Duration::days(30)));
    }

    #[test]
    fn test_renewal_before_expiry_extends_from_expiry() {
        let first = applied(None, &checkout("evt_1", Some("general_30day"), now()), now());
        let later = now() + Duration::days(10);

        let renewed = applied(
            Some(first),
            &checkout("evt_2", Some("general_30day"), later),
            later,
        );
        assert_eq!(
            renewed.general_pass_expires_at,
            Some(now() + Duration::days(60))
        );
    }

    #[test]
    fn test_renewal_after_expiry_extends_from_now() {
        let first = applied(None, &checkout("evt_1", Some("general_30day"), now()), now());
        let later = now() + Duration::days(45);

        let renewed = applied(
            Some(first),
            &checkout("evt_2", Some("general_30day"), later),
            later,
        );
        assert_eq!(
            renewed.general_pass_expires_at,
            Some(later + Duration::days(30))
        );
    }

    #[test]
    fn test_extend_expiry_law() {
        let e = now() + Duration::days(5);
        assert_eq!(
            extend_expiry(Some(e), now(), PassType::Annual),
            e + Duration::days(365)
        );
        let e = now() - Duration::days(5);
        assert_eq!(
            extend_expiry(Some(e), now(), PassType::Nursing30Day),
            now() + Duration::days(30)
        );
        assert_eq!(
            extend_expiry(None, now(), PassType::General30Day),
            now() + Duration::days(30)
        );
    }

    #[test]
    fn test_nursing_pass_does_not_grant_general() {
        let profile = applied(None, &checkout("evt_1", Some("nursing_30day"), now()), now());

        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::Nursing, now()),
            Tier::NursingPass
        );
        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::General, now()),
            Tier::Free
        );
    }

    #[test]
    fn test_annual_checkout_sets_annual_expiry() {
        let profile = applied(None, &checkout("evt_1", Some("annual"), now()), now());
        assert_eq!(profile.annual_expires_at, Some(now() + Duration::days(365)));
        assert_eq!(profile.tier, Tier::Annual);
    }

    #[test]
    fn test_pass_checkout_keeps_legacy_pro_in_other_domain() {
        let mut profile = UserProfile::new("user-1", now() - Duration::days(400));
        profile.tier = Tier::Pro;
        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::General, now()),
            Tier::Pro
        );

        let updated = applied(Some(profile), &checkout("evt_1", Some("nursing_30day"), now()), now());

        assert_eq!(updated.tier, Tier::Pro);
        assert_eq!(
            resolve_tier(Some(&updated), false, FeatureDomain::General, now()),
            Tier::Pro
        );
        assert_eq!(
            resolve_tier(Some(&updated), false, FeatureDomain::Nursing, now()),
            Tier::NursingPass
        );

        // Once the pass lapses the nursing domain falls back to pro, not free.
        let later = now() + Duration::days(31);
        assert_eq!(
            resolve_tier(Some(&updated), false, FeatureDomain::Nursing, later),
            Tier::Pro
        );
    }

    // ─── Refunds ─────────────────────────────────────────────────

    #[test]
    fn test_refund_revokes_pass_immediately() {
        let profile = applied(None, &checkout("evt_1", Some("nursing_30day"), now()), now());
        let refunded = applied(Some(profile), &refund("evt_2", "nursing_30day", Some(true)), now());

        let expiry = refunded.nursing_pass_expires_at.unwrap();
        assert!(expiry <= now());
        assert_eq!(
            resolve_tier(Some(&refunded), false, FeatureDomain::Nursing, now()),
            Tier::Free
        );
        assert_eq!(refunded.tier, Tier::Free);
    }

    #[test]
    fn test_refund_without_refunded_flag_revokes() {
        let profile = applied(None, &checkout("evt_1", Some("nursing_30day"), now()), now());
        let refunded = applied(Some(profile), &refund("evt_2", "nursing_30day", None), now());

        assert_eq!(refunded.nursing_pass_expires_at, Some(now()));
        assert_eq!(
            resolve_tier(Some(&refunded), false, FeatureDomain::Nursing, now()),
            Tier::Free
        );
    }

    #[test]
    fn test_refund_keeps_legacy_pro() {
        let mut profile = UserProfile::new("user-1", now() - Duration::days(400));
        profile.tier = Tier::Pro;
        let profile = applied(Some(profile), &checkout("evt_1", Some("nursing_30day"), now()), now());
        let refunded = applied(Some(profile), &refund("evt_2", "nursing_30day", None), now());

        assert_eq!(refunded.tier, Tier::Pro);
        assert_eq!(
            resolve_tier(Some(&refunded), false, FeatureDomain::Nursing, now()),
            Tier::Pro
        );
    }

    #[test]
    fn test_partial_refund_keeps_pass() {
        let profile = applied(None, &checkout("evt_1", Some("nursing_30day"), now()), now());
        let result = apply(Some(profile), &refund("evt_2", "nursing_30day", Some(false)), now());
        assert_eq!(result.outcome, Outcome::Ignored("partial refund"));
    }

    #[test]
    fn test_refund_does_not_touch_other_channel() {
        let mut profile = UserProfile::new("user-1", now());
        profile.set_pass(
            PassType::Nursing30Day,
            now() + Duration::days(20),
            PaymentChannel::Apple,
        );

        let result = apply(Some(profile), &refund("evt_2", "nursing_30day", Some(true)), now());
        assert_eq!(
            result.outcome,
            Outcome::Ignored("pass granted by another channel")
        );
    }

    #[test]
    fn test_refund_without_profile_is_unknown_user() {
        let result = apply(None, &refund("evt_2", "nursing_30day", Some(true)), now());
        assert_eq!(result.outcome, Outcome::UnknownUser);
    }

    // ─── Subscriptions ───────────────────────────────────────────

    #[test]
    fn test_subscription_checkout_activates_pro() {
        let profile = applied(None, &checkout("evt_1", None, now()), now());

        assert_eq!(profile.tier, Tier::Pro);
        assert_eq!(profile.subscription_status, SubscriptionStatus::Active);
        assert_eq!(profile.subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn test_payment_failure_is_grace_period() {
        let profile = applied(None, &checkout("evt_1", None, now()), now());
        let failed = stripe_event(
            "evt_2",
            "invoice.payment_failed",
            now() + Duration::minutes(5),
            json!({ "subscription": "sub_1", "customer": "cus_1" }),
        );
        let failed = ProviderEvent::from_stripe(&failed).unwrap();

        let profile = applied(Some(profile), &failed, now());
        assert_eq!(profile.subscription_status, SubscriptionStatus::PastDue);
        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::General, now()),
            Tier::Pro
        );

        let paid = stripe_event(
            "evt_3",
            "invoice.paid",
            now() + Duration::minutes(10),
            json!({ "subscription": "sub_1", "customer": "cus_1" }),
        );
        let paid = ProviderEvent::from_stripe(&paid).unwrap();
        let profile = applied(Some(profile), &paid, now());
        assert_eq!(profile.subscription_status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_subscription_deleted_downgrades_pro_immediately() {
        let profile = applied(None, &checkout("evt_1", None, now()), now());
        let deleted = subscription_event(
            "evt_2",
            "customer.subscription.deleted",
            "canceled",
            now() + Duration::minutes(1),
        );

        let profile = applied(Some(profile), &deleted, now());
        assert_eq!(profile.subscription_status, SubscriptionStatus::Canceled);
        assert_eq!(profile.tier, Tier::Free);
        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::General, now()),
            Tier::Free
        );
    }

    #[test]
    fn test_cancel_keeps_pass_until_expiry() {
        let profile = applied(None, &checkout("evt_1", None, now()), now());
        let profile = applied(
            Some(profile),
            &checkout("evt_2", Some("general_30day"), now()),
            now(),
        );
        let deleted = subscription_event(
            "evt_3",
            "customer.subscription.deleted",
            "canceled",
            now() + Duration::minutes(1),
        );

        let profile = applied(Some(profile), &deleted, now());
        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::General, now()),
            Tier::GeneralPass
        );
    }

    #[test]
    fn test_stale_subscription_update_is_dropped() {
        let profile = applied(None, &checkout("evt_1", None, now()), now());
        let deleted = subscription_event(
            "evt_2",
            "customer.subscription.deleted",
            "canceled",
            now() + Duration::minutes(10),
        );
        let profile = applied(Some(profile), &deleted, now());

        let late_update = subscription_event(
            "evt_3",
            "customer.subscription.updated",
            "active",
            now() + Duration::minutes(5),
        );
        let result = apply(Some(profile), &late_update, now());
        assert_eq!(result.outcome, Outcome::Stale);
    }

    #[test]
    fn test_delayed_checkout_does_not_resurrect_deleted_subscription() {
        let deleted_at = now() + Duration::minutes(10);
        let mut deleted_event = subscription_event(
            "evt_2",
            "customer.subscription.deleted",
            "canceled",
            deleted_at,
        );
        if let EntitlementEvent::SubscriptionDeleted { user } = &mut deleted_event.kind {
            user.user_id = Some("user-1".to_string());
        }
        let profile = applied(None, &deleted_event, now());

        let profile = applied(Some(profile), &checkout("evt_1", None, now()), now());
        assert_eq!(profile.subscription_status, SubscriptionStatus::Canceled);
        assert_eq!(profile.tier, Tier::Free);
        assert_eq!(
            resolve_tier(Some(&profile), false, FeatureDomain::General, now()),
            Tier::Free
        );
    }

    #[test]
    fn test_unhandled_event_is_ignored() {
        let event = ProviderEvent {
            id: "evt_1".to_string(),
            created: now(),
            kind: EntitlementEvent::Unhandled("product.created".to_string()),
        };
        let profile = UserProfile::new("user-1", now());
        let result = apply(Some(profile), &event, now());
        assert_eq!(result.outcome, Outcome::Ignored("unhandled event type"));
        assert!(result.profile.is_none());
    }
}
