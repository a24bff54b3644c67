// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Profiles (entitlement state, one document per user)
//! - Usage (monthly counters, changed only by increment transforms)
//! - Beta testers (membership lookup)

use crate::db::collections;
use crate::error::AppError;
use crate::models::{Feature, UsagePeriod, UserProfile};
use futures_util::FutureExt;
use serde::Deserialize;

/// Beta membership document. Presence grants beta unless explicitly disabled.
#[derive(Debug, Deserialize)]
struct BetaTester {
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Emulator client with a dummy token source (no local credentials).
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Profile Operations ──────────────────────────────────────

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PROFILES)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or replace a profile, keyed by user_id.
    pub async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PROFILES)
            .document_id(&profile.user_id)
            .object(profile)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Return the user's profile, creating a free-tier one on first access.
    ///
    /// Creation runs in a transaction so it never overwrites a profile a
    /// webhook created concurrently.
    pub async fn ensure_profile(
        &self,
        user_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<UserProfile, AppError> {
        if let Some(profile) = self.get_profile(user_id).await? {
            return Ok(profile);
        }

        let target = user_id.to_string();
        let profile = self
            .reconcile_profile(user_id, move |current| match current {
                Some(existing) => (None, existing),
                None => {
                    let created = UserProfile::new(target.clone(), now);
                    (Some(created.clone()), created)
                }
            })
            .await?;

        tracing::debug!(user_id, "Profile ensured");
        Ok(profile)
    }

    async fn find_profile_by_field(
        &self,
        field: &'static str,
        value: &str,
    ) -> Result<Option<UserProfile>, AppError> {
        let mut matches: Vec<UserProfile> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::PROFILES)
            .filter(|q| q.for_all([q.field(field).eq(value)]))
            .limit(2)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if matches.len() > 1 {
            tracing::warn!(field, value, "Multiple profiles share a provider reference");
        }

        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }

    pub async fn find_profile_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserProfile>, AppError> {
        self.find_profile_by_field("subscription_id", subscription_id)
            .await
    }

    pub async fn find_profile_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserProfile>, AppError> {
        self.find_profile_by_field("stripe_customer_id", customer_id)
            .await
    }

    /// Transactional read-modify-write of one profile.
    ///
    /// `apply` receives the current document (if any) and returns the
    /// profile to write (`None` writes nothing) plus a result for the
    /// caller. Firestore retries the transaction on contention, so `apply`
    /// may run more than once and must be pure.
    pub async fn reconcile_profile<T, F>(&self, user_id: &str, apply: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: Fn(Option<UserProfile>) -> (Option<UserProfile>, T) + Clone + Send + Sync + 'static,
    {
        let user_id = user_id.to_string();

        self.get_client()?
            .run_transaction(move |db, transaction| {
                let apply = apply.clone();
                let user_id = user_id.clone();

                async move {
                    let current: Option<UserProfile> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::PROFILES)
                        .obj()
                        .one(&user_id)
                        .await?;

                    let (next, result) = apply(current);

                    if let Some(profile) = next {
                        db.fluent()
                            .update()
                            .in_col(collections::PROFILES)
                            .document_id(&user_id)
                            .object(&profile)
                            .add_to_transaction(transaction)?;
                    }

                    Ok(result)
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Database(format!("Profile transaction failed: {}", e)))
    }

    // ─── Beta Operations ─────────────────────────────────────────

    pub async fn is_beta_tester(&self, user_id: &str) -> Result<bool, AppError> {
        let entry: Option<BetaTester> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::BETA_TESTERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(entry.is_some_and(|b| b.active))
    }

    // ─── Usage Operations ────────────────────────────────────────

    /// Usage counters for a period; a missing document is an empty period.
    pub async fn get_usage(&self, user_id: &str, period: &str) -> Result<UsagePeriod, AppError> {
        let stored: Option<UsagePeriod> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USAGE)
            .obj()
            .one(&UsagePeriod::document_id(user_id, period))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut usage = stored.unwrap_or_default();
        // Transform-created documents carry only the counters.
        usage.user_id = user_id.to_string();
        usage.period = period.to_string();
        Ok(usage)
    }

    /// Atomically add `by` to one feature counter.
    ///
    /// A single server-side increment transform committed on its own; the
    /// document is created on first use. Concurrent calls never lose updates.
    pub async fn increment_usage(
        &self,
        user_id: &str,
        period: &str,
        feature: Feature,
        by: i64,
    ) -> Result<(), AppError> {
        let client = self.get_client()?;
        let field = format!("counts.{}", feature.as_str());

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        client
            .fluent()
            .update()
            .in_col(collections::USAGE)
            .document_id(UsagePeriod::document_id(user_id, period))
            .transforms(|t| t.fields([t.field(field.as_str()).increment(by)]))
            .only_transform()
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(e.to_string()))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit usage increment: {}", e)))?;

        tracing::debug!(user_id, period, feature = %feature, by, "Usage incremented");
        Ok(())
    }
}
