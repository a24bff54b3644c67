// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod entitlement;
pub mod llm;
pub mod quota;
pub mod receipts;
pub mod reconcile;
pub mod retry;
pub mod stripe;
pub mod usage;

pub use entitlement::{resolve_entitlements, resolve_tier, Entitlements};
pub use llm::AnthropicClient;
pub use quota::{check_quota, limit_for, QuotaDecision, UNLIMITED};
pub use receipts::{Platform, ReceiptVerifier};
pub use reconcile::ReconcileService;
pub use stripe::StripeClient;
pub use usage::UsageService;
