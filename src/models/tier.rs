// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscription tiers, pass products and payment channels.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Entitlement level that governs feature limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Beta,
    NursingPass,
    GeneralPass,
    Annual,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::Free,
        Tier::Pro,
        Tier::Beta,
        Tier::NursingPass,
        Tier::GeneralPass,
        Tier::Annual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Beta => "beta",
            Tier::NursingPass => "nursing_pass",
            Tier::GeneralPass => "general_pass",
            Tier::Annual => "annual",
        }
    }

    /// Rank used when two grants compete for the stored `tier` field.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Pro => 1,
            Tier::NursingPass | Tier::GeneralPass => 2,
            Tier::Annual => 3,
            Tier::Beta => 4,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-boxed product sold through checkout or the app stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum PassType {
    #[serde(rename = "nursing_30day")]
    Nursing30Day,
    #[serde(rename = "general_30day")]
    General30Day,
    #[serde(rename = "annual")]
    Annual,
}

impl PassType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassType::Nursing30Day => "nursing_30day",
            PassType::General30Day => "general_30day",
            PassType::Annual => "annual",
        }
    }

    /// How long one purchase extends the entitlement.
    pub fn duration(&self) -> Duration {
        match self {
            PassType::Nursing30Day | PassType::General30Day => Duration::days(30),
            PassType::Annual => Duration::days(365),
        }
    }

    /// Tier recorded on the profile when this product is granted.
    pub fn tier(&self) -> Tier {
        match self {
            PassType::Nursing30Day => Tier::NursingPass,
            PassType::General30Day => Tier::GeneralPass,
            PassType::Annual => Tier::Annual,
        }
    }
}

impl fmt::Display for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nursing_30day" => Ok(PassType::Nursing30Day),
            "general_30day" => Ok(PassType::General30Day),
            "annual" => Ok(PassType::Annual),
            other => Err(format!("unknown pass type '{}'", other)),
        }
    }
}

/// Recurring subscription state as last reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    #[default]
    None,
}

impl SubscriptionStatus {
    /// Map a Stripe subscription status string.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" | "trialing" => SubscriptionStatus::Active,
            "past_due" | "unpaid" | "incomplete" => SubscriptionStatus::PastDue,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::None,
        }
    }
}

/// Purchase path that granted a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum PaymentChannel {
    Stripe,
    Apple,
    Google,
}
