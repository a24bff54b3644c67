// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::models::UnknownFeature;
use crate::services::quota::QuotaDecision;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Outbound service an upstream error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Stripe,
    Anthropic,
    AppStore,
    GooglePlay,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Provider::Stripe => "stripe",
            Provider::Anthropic => "anthropic",
            Provider::AppStore => "app_store",
            Provider::GooglePlay => "google_play",
        })
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Usage limit reached ({} of {})", .0.used, .0.limit)]
    QuotaExceeded(QuotaDecision),

    #[error("Usage lookup unavailable: {0}")]
    UsageUnavailable(String),

    #[error("Webhook signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("{provider} API error: {message}")]
    Upstream {
        provider: Provider,
        message: String,
        /// Network failure, rate limit or 5xx; safe to retry read-like calls
        transient: bool,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn upstream(provider: Provider, message: impl Into<String>) -> Self {
        AppError::Upstream {
            provider,
            message: message.into(),
            transient: false,
        }
    }

    pub fn upstream_transient(provider: Provider, message: impl Into<String>) -> Self {
        AppError::Upstream {
            provider,
            message: message.into(),
            transient: true,
        }
    }

    /// Map a reqwest transport error (no HTTP status received).
    pub fn from_transport(provider: Provider, err: reqwest::Error) -> Self {
        Self::upstream_transient(provider, format!("request failed: {}", err))
    }

    /// Map a non-success HTTP status from a provider.
    pub fn from_status(provider: Provider, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::upstream_transient(provider, message)
        } else {
            Self::upstream(provider, message)
        }
    }

    /// Whether a bounded retry may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Upstream {
                transient: true,
                ..
            }
        )
    }
}

impl From<UnknownFeature> for AppError {
    fn from(err: UnknownFeature) -> Self {
        AppError::UnknownFeature(err.0)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    /// Quota state for denied usage
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<QuotaDecision>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let usage = match &self {
            AppError::QuotaExceeded(decision) => Some(*decision),
            _ => None,
        };

        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::UnknownFeature(key) => {
                tracing::error!(feature = %key, "Unknown feature key (limit table out of date?)");
                (
                    StatusCode::BAD_REQUEST,
                    "unknown_feature",
                    Some(key.clone()),
                )
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::QuotaExceeded(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "quota_exceeded",
                Some("Feature unavailable, see upgrade options".to_string()),
            ),
            AppError::UsageUnavailable(msg) => {
                tracing::error!(error = %msg, "Usage lookup failed, failing closed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "usage_unavailable",
                    Some("Feature unavailable, see upgrade options".to_string()),
                )
            }
            AppError::InvalidSignature(msg) => {
                tracing::warn!(reason = %msg, "Rejected webhook payload");
                (StatusCode::BAD_REQUEST, "invalid_signature", None)
            }
            AppError::Upstream {
                provider, message, ..
            } => {
                tracing::error!(provider = %provider, error = %message, "Upstream error");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    Some(provider.to_string()),
                )
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            usage,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, Tier};
    use crate::services::quota::check_quota;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_quota_exceeded_carries_decision() {
        let decision = check_quota(Tier::Free, Feature::NursingMock, 1);
        let (status, body) = body_json(AppError::QuotaExceeded(decision)).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "quota_exceeded");
        assert_eq!(body["usage"]["limit"], 1);
        assert_eq!(body["usage"]["allowed"], false);
    }

    #[tokio::test]
    async fn test_internal_details_not_exposed() {
        let (status, body) =
            body_json(AppError::UsageUnavailable("deadline exceeded on usage/x".into())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.to_string().contains("deadline"));

        let (status, body) = body_json(AppError::Database("connection refused".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_transient_classification() {
        let rate_limited = AppError::from_status(
            Provider::Stripe,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "",
        );
        assert!(rate_limited.is_transient());

        let bad_gateway =
            AppError::from_status(Provider::Anthropic, reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(bad_gateway.is_transient());

        let invalid =
            AppError::from_status(Provider::Stripe, reqwest::StatusCode::BAD_REQUEST, "no");
        assert!(!invalid.is_transient());
        assert!(!AppError::Database("x".into()).is_transient());
    }
}
