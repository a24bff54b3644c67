// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bounded retry for read-like outbound calls.

use crate::error::AppError;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts (first try included).
pub const DEFAULT_ATTEMPTS: u32 = 3;

const BASE_DELAY_MS: u64 = 200;

/// Run `f` until it succeeds, fails permanently, or `max_attempts` is reached.
///
/// Only errors reporting [`AppError::is_transient`] are retried. Never wrap a
/// mutating call whose repetition would have side effects.
pub async fn retry_transient<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    mut f: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = Duration::from_millis(BASE_DELAY_MS << (attempt - 1));
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
