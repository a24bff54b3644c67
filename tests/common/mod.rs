// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::{to_bytes, Body};
use interview_coach_api::config::Config;
use interview_coach_api::db::FirestoreDb;
use interview_coach_api::middleware::auth::create_jwt;
use interview_coach_api::routes::create_router;
use interview_coach_api::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Unique id per test so emulator runs do not collide.
#[allow(dead_code)]
pub fn unique_user_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

/// Create a test app with an offline store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(Config::test_default(), FirestoreDb::new_mock()));
    (create_router(state.clone()), state)
}

/// Session token for `user_id` signed with the test key.
#[allow(dead_code)]
pub fn test_token(user_id: &str) -> String {
    create_jwt(user_id, &Config::test_default().jwt_signing_key).unwrap()
}

#[allow(dead_code)]
pub async fn body_json(body: Body) -> serde_json::Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
