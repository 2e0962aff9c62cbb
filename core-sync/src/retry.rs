//! # Retry and Backoff
//!
//! Bounded exponential backoff for page fetches. Transient network errors
//! and rate limiting are retried; everything else surfaces immediately.
//! A provider `Retry-After` hint is always waited out in full; a hint past
//! the configured ceiling ends the retries instead of being shortened.
//! Every wait is raced against the run's cancellation token.

use crate::{Result, SyncError};
use bridge_traits::http::HttpResponse;
use core_runtime::config::SyncSettings;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap for computed backoff. Provider hints are not subject to it.
    pub max_delay: Duration,
    /// Longest `Retry-After` hint the policy is willing to wait for.
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_retry_attempts.max(1),
            base_delay: settings.base_backoff,
            max_delay: settings.max_backoff,
            max_retry_after: settings.max_retry_after,
        }
    }

    /// `base * 2^(attempt-1)`, capped at `max_delay`. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, or `None` when `error` must not be
    /// retried or attempts are exhausted.
    ///
    /// With a provider `Retry-After` hint the delay is at least the hint.
    /// Hints longer than `max_retry_after` yield `None`.
    pub fn delay_for(&self, attempt: u32, error: &SyncError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return None;
        }
        let computed = self.backoff(attempt);
        match error {
            SyncError::RateLimited {
                retry_after: Some(hint),
            } if *hint > self.max_retry_after => None,
            SyncError::RateLimited {
                retry_after: Some(hint),
            } => Some((*hint).max(computed)),
            _ => Some(computed),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

/// Run `operation` until it succeeds, fails permanently, exhausts the
/// policy or `cancel` fires.
///
/// Cancellation drops the in-flight future, which aborts the underlying
/// request, and returns [`SyncError::Cancelled`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(delay) = policy.delay_for(attempt, &error) else {
            if let SyncError::RateLimited {
                retry_after: Some(hint),
            } = &error
            {
                if *hint > policy.max_retry_after {
                    warn!(
                        retry_after_secs = hint.as_secs(),
                        ceiling_secs = policy.max_retry_after.as_secs(),
                        "Provider asked to wait longer than allowed, giving up"
                    );
                    return Err(error);
                }
            }
            if error.is_retryable() {
                warn!(attempts = attempt, error = %error, "Retries exhausted");
            }
            return Err(error);
        };

        debug!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Map an HTTP status onto the sync error taxonomy.
///
/// Success responses pass through. 401/403 are credential failures, 429
/// carries the `Retry-After` hint, 5xx and 408 are transient. Any other
/// status means the request shape no longer matches the provider API.
pub fn check_status(provider: &str, response: HttpResponse) -> Result<HttpResponse> {
    let status = response.status;
    match status {
        200..=299 => Ok(response),
        401 | 403 => Err(SyncError::Credential {
            provider: provider.to_string(),
            status: Some(status),
            message: format!("HTTP {}", status),
        }),
        429 => Err(SyncError::RateLimited {
            retry_after: response.retry_after(),
        }),
        408 | 500..=599 => Err(SyncError::TransientNetwork(format!("HTTP {}", status))),
        _ => Err(SyncError::MalformedResponse {
            provider: provider.to_string(),
            message: format!("unexpected HTTP {}", status),
        }),
    }
}
