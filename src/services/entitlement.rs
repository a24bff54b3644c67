// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Effective tier resolution.
//!
//! Everything here is a pure function of the profile snapshot, the beta flag
//! and the evaluation time. Expired passes fall back silently; nothing is
//! written at read time.

use crate::models::{FeatureDomain, PassType, SubscriptionStatus, Tier, UserProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A pass is active iff its expiry is set and strictly after `now`.
pub fn is_active(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expiry| expiry > now)
}

/// Recurring subscription in good standing (past_due keeps its grace period).
fn is_legacy_pro(profile: &UserProfile) -> bool {
    let tracked = profile.subscription_id.is_some()
        && matches!(
            profile.subscription_status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        );
    // Profiles that predate subscription tracking only carry `tier = pro`.
    let untracked =
        profile.tier == Tier::Pro && profile.subscription_status != SubscriptionStatus::Canceled;
    tracked || untracked
}

fn domain_pass_active(profile: &UserProfile, domain: FeatureDomain, now: DateTime<Utc>) -> bool {
    match domain {
        FeatureDomain::Nursing => is_active(profile.nursing_pass_expires_at, now),
        FeatureDomain::General => is_active(profile.general_pass_expires_at, now),
    }
}

/// Resolve the tier that gates features of one domain.
///
/// Precedence: beta > unexpired annual > unexpired domain pass > legacy pro
/// > free. A missing profile resolves to free (or beta when flagged).
pub fn resolve_tier(
    profile: Option<&UserProfile>,
    is_beta: bool,
    domain: FeatureDomain,
    now: DateTime<Utc>,
) -> Tier {
    if is_beta || profile.is_some_and(|p| p.tier == Tier::Beta) {
        return Tier::Beta;
    }

    let Some(profile) = profile else {
        return Tier::Free;
    };

    if is_active(profile.annual_expires_at, now) {
        return Tier::Annual;
    }

    if domain_pass_active(profile, domain, now) {
        return match domain {
            FeatureDomain::Nursing => Tier::NursingPass,
            FeatureDomain::General => Tier::GeneralPass,
        };
    }

    if is_legacy_pro(profile) {
        return Tier::Pro;
    }

    Tier::Free
}

/// Point-in-time entitlement summary for both domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Entitlements {
    /// Display tier: the strongest grant across domains
    pub tier: Tier,
    pub general_tier: Tier,
    pub nursing_tier: Tier,
}

/// Resolve both domains at once.
pub fn resolve_entitlements(
    profile: Option<&UserProfile>,
    is_beta: bool,
    now: DateTime<Utc>,
) -> Entitlements {
    let general_tier = resolve_tier(profile, is_beta, FeatureDomain::General, now);
    let nursing_tier = resolve_tier(profile, is_beta, FeatureDomain::Nursing, now);

    // A pass in either domain outranks legacy pro for display purposes.
    let tier = if general_tier.rank() >= nursing_tier.rank() {
        general_tier
    } else {
        nursing_tier
    };

    Entitlements {
        tier,
        general_tier,
        nursing_tier,
    }
}

/// Whether buying `requested` would duplicate an entitlement the user holds.
///
/// `None` is the recurring pro subscription. Passes stack (renewing early
/// extends from the current expiry), so only a grant that already covers
/// the product entirely blocks a purchase: an active subscription blocks a
/// second one, and an active annual pass blocks 30-day passes and the
/// subscription.
pub fn has_equivalent_entitlement(
    profile: &UserProfile,
    requested: Option<PassType>,
    now: DateTime<Utc>,
) -> bool {
    let annual = is_active(profile.annual_expires_at, now);
    match requested {
        None => annual || is_legacy_pro(profile),
        Some(PassType::Nursing30Day | PassType::General30Day) => annual,
        Some(PassType::Annual) => false,
    }
}
