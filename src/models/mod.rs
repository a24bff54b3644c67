// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod profile;
pub mod tier;
pub mod usage;

pub use profile::UserProfile;
pub use tier::{PassType, PaymentChannel, SubscriptionStatus, Tier};
pub use usage::{Feature, FeatureDomain, UnknownFeature, UsagePeriod};
