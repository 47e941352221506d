//! Rate-limit rules and check results.
//!
//! A [`RateLimitRule`] names *who* is limited (identifier plus optional
//! endpoint scope), *how many* requests are allowed and over *which* rolling
//! window. Rules derive the storage key under which the limiter keeps the
//! window log. A [`RateLimitResult`] is the ephemeral outcome of one check;
//! it is produced per call and never persisted.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported rolling windows, each a fixed number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitWindow {
    Second,
    Minute,
    Hour,
    Day,
    /// 30 days.
    Month,
}

impl RateLimitWindow {
    /// Window length in seconds.
    pub const fn seconds(&self) -> u64 {
        match self {
            RateLimitWindow::Second => 1,
            RateLimitWindow::Minute => 60,
            RateLimitWindow::Hour => 3_600,
            RateLimitWindow::Day => 86_400,
            RateLimitWindow::Month => 2_592_000,
        }
    }

    /// Canonical name used in storage keys.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RateLimitWindow::Second => "second",
            RateLimitWindow::Minute => "minute",
            RateLimitWindow::Hour => "hour",
            RateLimitWindow::Day => "day",
            RateLimitWindow::Month => "month",
        }
    }
}

impl fmt::Display for RateLimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitWindow {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "second" => Ok(RateLimitWindow::Second),
            "minute" => Ok(RateLimitWindow::Minute),
            "hour" => Ok(RateLimitWindow::Hour),
            "day" => Ok(RateLimitWindow::Day),
            "month" => Ok(RateLimitWindow::Month),
            other => Err(RuleError::InvalidWindow(other.to_string())),
        }
    }
}

/// Error returned when rule configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The request limit must be at least 1.
    #[error("rate limit must be positive")]
    NonPositiveLimit,
    /// Unknown window name.
    #[error("invalid rate limit window: {0}")]
    InvalidWindow(String),
}

/// A validated rate-limiting rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    /// User id, IP address, API key, ...
    pub identifier: String,
    /// Maximum requests allowed inside the window.
    pub limit: u32,
    /// Rolling window.
    pub window: RateLimitWindow,
    /// Optional endpoint scope; limits with and without an endpoint are
    /// tracked under separate keys.
    pub endpoint: Option<String>,
}

impl RateLimitRule {
    /// Create a rule, validating that the limit is positive.
    pub fn new(
        identifier: impl Into<String>,
        limit: u32,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> Result<Self, RuleError> {
        if limit == 0 {
            return Err(RuleError::NonPositiveLimit);
        }
        Ok(Self {
            identifier: identifier.into(),
            limit,
            window,
            endpoint: endpoint.map(str::to_string),
        })
    }

    /// Storage key for this rule's window log:
    /// `rate_limit:{identifier}:{window}[:{endpoint}]`.
    pub fn storage_key(&self) -> String {
        Self::key_for(&self.identifier, self.window, self.endpoint.as_deref())
    }

    /// Storage key for a window log without constructing a full rule.
    ///
    /// Admin operations (usage stats, resets) address keys by identifier,
    /// window and endpoint alone; routing them through here keeps the key
    /// format in one place.
    pub fn key_for(identifier: &str, window: RateLimitWindow, endpoint: Option<&str>) -> String {
        let mut key = format!("rate_limit:{identifier}:{window}");
        if let Some(endpoint) = endpoint {
            key.push(':');
            key.push_str(endpoint);
        }
        key
    }

    /// Key prefix shared by all windows of one identifier, used for scans.
    pub fn key_prefix(identifier: &str) -> String {
        format!("rate_limit:{identifier}:")
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window.seconds()
    }
}

/// Outcome of one rate-limit check.
///
/// Exceeding the limit is a normal outcome encoded here, never an error
/// from the check itself. Use [`RateLimitResult::exceeded_error`] at call
/// sites that want to surface the rejection as a typed error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// The configured limit.
    pub limit: u32,
    /// Requests left inside the current window.
    pub remaining: u32,
    /// Unix timestamp at which the window fully resets.
    pub reset_time: u64,
    /// Seconds until a retry is worthwhile; set only on rejection.
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    /// Convert a rejection into a [`RateLimitExceeded`] error.
    ///
    /// Returns `None` when the request was allowed.
    pub fn exceeded_error(
        &self,
        identifier: &str,
        window: RateLimitWindow,
        endpoint: Option<&str>,
    ) -> Option<RateLimitExceeded> {
        if self.allowed {
            return None;
        }
        Some(RateLimitExceeded {
            identifier: identifier.to_string(),
            limit: self.limit,
            window,
            retry_after: self.retry_after,
            endpoint: endpoint.map(str::to_string),
        })
    }
}

/// Typed error for callers that treat a rejected check as a failure.
///
/// An expected condition, not a bug: the limiter itself only ever returns
/// it through [`RateLimitResult::exceeded_error`] or the limiter's
/// `enforce` helper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit exceeded: {limit} requests per {window}")]
pub struct RateLimitExceeded {
    /// Who hit the limit.
    pub identifier: String,
    /// The configured limit.
    pub limit: u32,
    /// The window the limit applies to.
    pub window: RateLimitWindow,
    /// Seconds until a retry is worthwhile.
    pub retry_after: Option<u64>,
    /// Endpoint scope, if any.
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_seconds() {
        assert_eq!(RateLimitWindow::Second.seconds(), 1);
        assert_eq!(RateLimitWindow::Minute.seconds(), 60);
        assert_eq!(RateLimitWindow::Hour.seconds(), 3_600);
        assert_eq!(RateLimitWindow::Day.seconds(), 86_400);
        assert_eq!(RateLimitWindow::Month.seconds(), 2_592_000);
    }

    #[test]
    fn test_window_from_str() {
        assert_eq!("minute".parse(), Ok(RateLimitWindow::Minute));
        assert_eq!("month".parse(), Ok(RateLimitWindow::Month));
        assert_eq!(
            "fortnight".parse::<RateLimitWindow>(),
            Err(RuleError::InvalidWindow("fortnight".to_string()))
        );
    }

    #[test]
    fn test_rule_rejects_zero_limit() {
        let err = RateLimitRule::new("user-1", 0, RateLimitWindow::Hour, None).unwrap_err();
        assert_eq!(err, RuleError::NonPositiveLimit);
    }

    #[test]
    fn test_storage_key_without_endpoint() {
        let rule = RateLimitRule::new("user-1", 10, RateLimitWindow::Hour, None).unwrap();
        assert_eq!(rule.storage_key(), "rate_limit:user-1:hour");
    }

    #[test]
    fn test_storage_key_with_endpoint() {
        let rule =
            RateLimitRule::new("user-1", 10, RateLimitWindow::Minute, Some("identify")).unwrap();
        assert_eq!(rule.storage_key(), "rate_limit:user-1:minute:identify");
    }

    #[test]
    fn test_key_for_matches_storage_key() {
        let rule =
            RateLimitRule::new("user-1", 10, RateLimitWindow::Minute, Some("identify")).unwrap();
        assert_eq!(
            RateLimitRule::key_for("user-1", RateLimitWindow::Minute, Some("identify")),
            rule.storage_key()
        );
        assert_eq!(
            RateLimitRule::key_for("user-1", RateLimitWindow::Hour, None),
            "rate_limit:user-1:hour"
        );
    }

    #[test]
    fn test_key_prefix_matches_storage_keys() {
        let rule = RateLimitRule::new("user-1", 10, RateLimitWindow::Day, Some("upload")).unwrap();
        assert!(rule
            .storage_key()
            .starts_with(&RateLimitRule::key_prefix("user-1")));
    }

    #[test]
    fn test_exceeded_error_only_on_rejection() {
        let allowed = RateLimitResult {
            allowed: true,
            limit: 5,
            remaining: 4,
            reset_time: 100,
            retry_after: None,
        };
        assert!(allowed
            .exceeded_error("user-1", RateLimitWindow::Hour, None)
            .is_none());

        let rejected = RateLimitResult {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_time: 100,
            retry_after: Some(30),
        };
        let err = rejected
            .exceeded_error("user-1", RateLimitWindow::Hour, Some("chat"))
            .unwrap();
        assert_eq!(err.limit, 5);
        assert_eq!(err.retry_after, Some(30));
        assert_eq!(err.endpoint.as_deref(), Some("chat"));
        assert_eq!(err.to_string(), "rate limit exceeded: 5 requests per hour");
    }
}
