// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Usage checks and increments against the stored counters.
//!
//! Any storage failure while deciding is reported as
//! [`AppError::UsageUnavailable`]: the gate fails closed.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::Feature;
use crate::services::entitlement::resolve_tier;
use crate::services::quota::{check_quota, QuotaDecision};
use crate::time_utils::period_key;
use chrono::{DateTime, Utc};

#[derive(Clone)]
pub struct UsageService {
    db: FirestoreDb,
}

impl UsageService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Decide whether `user_id` may use `feature` once more this period.
    ///
    /// Read-only: a missing profile or usage document counts as free tier
    /// with zero usage.
    pub async fn check(
        &self,
        user_id: &str,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, AppError> {
        let period = period_key(now);

        let (profile, is_beta, usage) = tokio::try_join!(
            self.db.get_profile(user_id),
            self.db.is_beta_tester(user_id),
            self.db.get_usage(user_id, &period),
        )
        .map_err(|e| unavailable(user_id, feature, e))?;

        let tier = resolve_tier(profile.as_ref(), is_beta, feature.domain(), now);
        let decision = check_quota(tier, feature, usage.count(feature));

        tracing::debug!(
            user_id,
            feature = %feature,
            period = %period,
            tier = %tier,
            used = decision.used,
            limit = decision.limit,
            allowed = decision.allowed,
            "Usage checked"
        );

        Ok(decision)
    }

    /// Count one successful use of `feature`.
    pub async fn record(
        &self,
        user_id: &str,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.db
            .increment_usage(user_id, &period_key(now), feature, 1)
            .await
            .map_err(|e| unavailable(user_id, feature, e))
    }
}

fn unavailable(user_id: &str, feature: Feature, err: AppError) -> AppError {
    tracing::error!(
        user_id,
        feature = %feature,
        error = %err,
        "Usage storage unavailable"
    );
    AppError::UsageUnavailable(err.to_string())
}
