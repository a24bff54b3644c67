// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    /// Entitlement profiles (keyed by user_id)
    pub const PROFILES: &str = "profiles";
    /// Monthly usage counters (keyed by `{user_id}_{YYYY-MM}`)
    pub const USAGE: &str = "usage";
    pub const BETA_TESTERS: &str = "beta_testers";
}
