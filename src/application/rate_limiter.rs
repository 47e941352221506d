//! Sliding-window rate limiter over a pluggable counter store.
//!
//! The limiter owns no window state itself; the [`CounterStore`] port does
//! the atomic check-and-record. This keeps the decision logic identical for
//! the in-process backend and the Redis backend.
//!
//! # Fail-open behavior
//! If the store is unavailable the limiter allows the request and logs a
//! warning. An unreachable backend must never take user traffic down with
//! it.

use crate::application::ports::{Clock, CounterStore, StoreError};
use crate::domain::rule::{
    RateLimitExceeded, RateLimitResult, RateLimitRule, RateLimitWindow, RuleError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Fallback reset horizon reported while failing open.
const FAIL_OPEN_RESET_SECONDS: u64 = 3_600;

/// Error returned by [`RateLimiter::enforce`].
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The rule itself was invalid.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// The check ran and the limit was exceeded.
    #[error(transparent)]
    Exceeded(#[from] RateLimitExceeded),
}

/// Point-in-time usage of one window log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStats {
    pub identifier: String,
    pub window: RateLimitWindow,
    pub endpoint: Option<String>,
    /// Requests currently inside the window.
    pub current_count: u64,
    /// Unix timestamps of those requests, oldest first.
    pub request_times: Vec<u64>,
    /// Start of the window (now minus window length).
    pub window_start: u64,
    /// End of the window (now).
    pub window_end: u64,
}

/// Backend connectivity report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHealth {
    pub healthy: bool,
    pub error: Option<String>,
}

/// Rate limiter coordinating checks against a counter store.
#[derive(Debug, Clone)]
pub struct RateLimiter<S: CounterStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a limiter using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(
            store,
            Arc::new(crate::infrastructure::clock::SystemClock::new()),
        )
    }

    /// Create a limiter with a custom clock, mainly for tests.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check a limit and record the request if admitted.
    pub async fn check(
        &self,
        identifier: &str,
        limit: u32,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> Result<RateLimitResult, RuleError> {
        let rule = RateLimitRule::new(identifier, limit, window, endpoint)?;
        Ok(self.check_rule(&rule).await)
    }

    /// Check a validated rule and record the request if admitted.
    pub async fn check_rule(&self, rule: &RateLimitRule) -> RateLimitResult {
        let now = self.clock.unix_now();
        let window_seconds = rule.window_seconds();
        let key = rule.storage_key();

        match self
            .store
            .check_and_record(&key, window_seconds, rule.limit, now)
            .await
        {
            Ok(check) if check.allowed => RateLimitResult {
                allowed: true,
                limit: rule.limit,
                // The request just recorded takes one slot on top of the
                // prior count.
                remaining: u64::from(rule.limit)
                    .saturating_sub(check.count)
                    .saturating_sub(1) as u32,
                reset_time: now + window_seconds,
                retry_after: None,
            },
            Ok(check) => {
                let retry_after = check
                    .oldest
                    .map(|oldest| (oldest + window_seconds).saturating_sub(now))
                    .unwrap_or(window_seconds);
                tracing::debug!(
                    key = %key,
                    limit = rule.limit,
                    count = check.count,
                    retry_after,
                    "rate limit exceeded"
                );
                RateLimitResult {
                    allowed: false,
                    limit: rule.limit,
                    remaining: 0,
                    reset_time: now + window_seconds,
                    retry_after: Some(retry_after),
                }
            }
            Err(error) => {
                tracing::warn!(key = %key, %error, "counter store failed, failing open");
                RateLimitResult {
                    allowed: true,
                    limit: rule.limit,
                    remaining: rule.limit,
                    reset_time: now + FAIL_OPEN_RESET_SECONDS,
                    retry_after: None,
                }
            }
        }
    }

    /// Check a limit, returning just the admission decision.
    pub async fn is_allowed(
        &self,
        identifier: &str,
        limit: u32,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> Result<bool, RuleError> {
        Ok(self.check(identifier, limit, window, endpoint).await?.allowed)
    }

    /// Check a limit and convert a rejection into an error.
    pub async fn enforce(
        &self,
        identifier: &str,
        limit: u32,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> Result<RateLimitResult, RateLimitError> {
        let result = self.check(identifier, limit, window, endpoint).await?;
        if let Some(exceeded) = result.exceeded_error(identifier, window, endpoint) {
            return Err(exceeded.into());
        }
        Ok(result)
    }

    /// Upper-bound estimate of when a window resets from now.
    ///
    /// The true reset depends on the oldest recorded request; this is the
    /// horizon assuming a request right now.
    pub fn get_reset_time(&self, window: RateLimitWindow) -> u64 {
        self.clock.unix_now() + window.seconds()
    }

    /// Drop the recorded requests for one limit.
    ///
    /// Returns false (after logging) if the store rejected the removal;
    /// resets are an admin convenience and must not propagate backend
    /// errors to the caller.
    pub async fn reset_limit(
        &self,
        identifier: &str,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> bool {
        let key = RateLimitRule::key_for(identifier, window, endpoint);
        match self.store.remove(&key).await {
            Ok(()) => {
                tracing::info!(key = %key, "rate limit reset");
                true
            }
            Err(error) => {
                tracing::warn!(key = %key, %error, "failed to reset rate limit");
                false
            }
        }
    }

    /// Current usage of one limit, without recording a request.
    pub async fn get_usage_stats(
        &self,
        identifier: &str,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> Result<UsageStats, StoreError> {
        let now = self.clock.unix_now();
        let window_seconds = window.seconds();
        let key = RateLimitRule::key_for(identifier, window, endpoint);

        let request_times = self.store.entries(&key, window_seconds, now).await?;
        Ok(UsageStats {
            identifier: identifier.to_string(),
            window,
            endpoint: endpoint.map(str::to_string),
            current_count: request_times.len() as u64,
            request_times,
            window_start: now.saturating_sub(window_seconds),
            window_end: now,
        })
    }

    /// Usage of every limit tracked for an identifier, keyed by storage key.
    ///
    /// Keys with an unrecognized window segment are skipped.
    pub async fn get_all_limits(
        &self,
        identifier: &str,
    ) -> Result<BTreeMap<String, UsageStats>, StoreError> {
        let prefix = RateLimitRule::key_prefix(identifier);
        let keys = self.store.scan_keys(&prefix).await?;

        let mut limits = BTreeMap::new();
        for key in keys {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let (window_name, endpoint) = match rest.split_once(':') {
                Some((window, endpoint)) => (window, Some(endpoint)),
                None => (rest, None),
            };
            let Ok(window) = window_name.parse::<RateLimitWindow>() else {
                tracing::debug!(key = %key, "skipping key with unknown window");
                continue;
            };
            let stats = self.get_usage_stats(identifier, window, endpoint).await?;
            limits.insert(key, stats);
        }
        Ok(limits)
    }

    /// Ping the counter store.
    pub async fn health_check(&self) -> StoreHealth {
        match self.store.ping().await {
            Ok(()) => StoreHealth {
                healthy: true,
                error: None,
            },
            Err(error) => StoreHealth {
                healthy: false,
                error: Some(error.to_string()),
            },
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
