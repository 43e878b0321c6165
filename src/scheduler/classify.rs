//! Error classification and retry policy
//!
//! Every job failure funnels through the [`ErrorType`] taxonomy before any
//! retry decision is made. Classification order: an explicit tag on the job
//! result wins; otherwise keyword heuristics on the free-text status, with one
//! reclassification rule (a `Permanent` verdict carrying anti-bot/blocking
//! language is downgraded to `RateLimit`, since blocks lift while bans do not).

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Failure classification driving retry and circuit-breaker decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Momentary failure (network blip, timeout); retried quickly
    Transient,
    /// Target is rate limiting or blocking requests; backs off hard
    RateLimit,
    /// The proxy itself failed or was detected; rotates proxy
    ProxyIssue,
    /// Captcha solving failed or budget ran dry for this attempt
    CaptchaFailed,
    /// The faucet is down or in maintenance
    FaucetDown,
    /// Local misconfiguration (selectors, credentials)
    ConfigError,
    /// Unrecoverable (banned account, closed faucet); job is dropped
    Permanent,
    /// Anything that did not match a known pattern
    Unknown,
}

impl ErrorType {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent)
    }

    /// Whether this error alone trips the faucet circuit breaker
    pub fn trips_breaker_immediately(&self) -> bool {
        matches!(self, Self::Permanent | Self::FaucetDown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimit => "rate_limit",
            Self::ProxyIssue => "proxy_issue",
            Self::CaptchaFailed => "captcha_failed",
            Self::FaucetDown => "faucet_down",
            Self::ConfigError => "config_error",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Default anti-bot/blocking phrases used for the Permanent -> RateLimit
/// downgrade. Overridable via `scheduler.blocking_keywords` in config.
pub const DEFAULT_BLOCKING_KEYWORDS: &[&str] = &[
    "blocked",
    "cloudflare",
    "access denied",
    "bot detected",
    "captcha wall",
    "unusual traffic",
];

const CONFIG_KEYWORDS: &[&str] = &[
    "not configured",
    "selector",
    "missing credential",
    "invalid config",
    "no executor",
];

const PERMANENT_KEYWORDS: &[&str] = &[
    "banned",
    "account disabled",
    "account suspended",
    "account closed",
    "invalid address",
    "faucet closed",
];

const PROXY_KEYWORDS: &[&str] = &[
    "proxy",
    "tunnel",
    "connection refused",
    "econnrefused",
    "socks",
    "err_proxy",
];

const CAPTCHA_KEYWORDS: &[&str] = &["captcha", "recaptcha", "hcaptcha", "turnstile"];

const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection reset",
    "temporarily",
    "try again",
    "502",
];

fn contains_any(status: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| status.contains(k))
}

fn contains_blocking(status: &str, blocking: &[String]) -> bool {
    blocking.iter().any(|k| status.contains(k.as_str()))
}

/// Resolve an [`ErrorType`] for a failed job outcome
///
/// An explicit `tag` takes precedence over the free-text `status`; the
/// Permanent -> RateLimit downgrade applies in both paths.
pub fn classify(tag: Option<ErrorType>, status: &str, blocking: &[String]) -> ErrorType {
    let status = status.to_lowercase();

    if let Some(tag) = tag {
        if tag == ErrorType::Permanent && contains_blocking(&status, blocking) {
            return ErrorType::RateLimit;
        }
        return tag;
    }

    // Keyword heuristics, most specific families first.
    if contains_any(&status, CONFIG_KEYWORDS) {
        return ErrorType::ConfigError;
    }
    if contains_any(&status, PERMANENT_KEYWORDS) {
        if contains_blocking(&status, blocking) {
            return ErrorType::RateLimit;
        }
        return ErrorType::Permanent;
    }
    if contains_any(&status, PROXY_KEYWORDS) {
        return ErrorType::ProxyIssue;
    }
    if contains_any(&status, CAPTCHA_KEYWORDS) {
        return ErrorType::CaptchaFailed;
    }
    if contains_any(&status, TRANSIENT_KEYWORDS) {
        return ErrorType::Transient;
    }

    ErrorType::Unknown
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Per-error-type recovery delays
///
/// `delay()` returns `None` for errors that must never be retried; the
/// scheduler drops such jobs instead of re-enqueueing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for repeated transient failures (first retry is immediate)
    pub transient_base_secs: u64,

    /// Base delay after a rate limit
    pub rate_limit_base_secs: u64,

    /// Escalation factor per repeated rate limit
    pub rate_limit_factor: f64,

    /// Cap on escalated rate-limit delays
    pub rate_limit_cap_secs: u64,

    /// Delay after a proxy failure (the proxy itself is rotated separately)
    pub proxy_issue_secs: u64,

    /// Delay after a failed captcha solve
    pub captcha_failed_secs: u64,

    /// Delay while a faucet is judged down
    pub faucet_down_secs: u64,

    /// Delay after a configuration error, giving the operator time to fix it
    pub config_error_secs: u64,

    /// Delay for unclassified failures
    pub unknown_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_base_secs: 300,
            rate_limit_base_secs: 600,
            rate_limit_factor: 3.0,
            rate_limit_cap_secs: 21_600,
            proxy_issue_secs: 1_800,
            captcha_failed_secs: 900,
            faucet_down_secs: 14_400,
            config_error_secs: 1_800,
            unknown_secs: 600,
        }
    }
}

impl RetryPolicy {
    /// Recovery delay before the next attempt, or `None` when the job must
    /// not be retried at all
    pub fn delay(&self, error_type: ErrorType, retry_count: u32) -> Option<Duration> {
        let secs = match error_type {
            ErrorType::Permanent => return None,
            ErrorType::Transient => {
                // Immediate the first time, then linear escalation.
                if retry_count == 0 {
                    0
                } else {
                    self.transient_base_secs.saturating_mul(retry_count as u64)
                }
            }
            ErrorType::RateLimit => {
                let escalated = self.rate_limit_base_secs as f64
                    * self.rate_limit_factor.powi(retry_count.min(8) as i32);
                (escalated as u64).min(self.rate_limit_cap_secs)
            }
            ErrorType::ProxyIssue => self.proxy_issue_secs,
            ErrorType::CaptchaFailed => self.captcha_failed_secs,
            ErrorType::FaucetDown => self.faucet_down_secs,
            ErrorType::ConfigError => self.config_error_secs,
            ErrorType::Unknown => self.unknown_secs,
        };
        Some(Duration::from_secs(secs))
    }
}

/// Owned copies of the default blocking keywords
pub fn default_blocking_keywords() -> Vec<String> {
    DEFAULT_BLOCKING_KEYWORDS.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Tests
// ============================================================================
