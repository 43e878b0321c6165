//! Per-faucet circuit breaker and security-challenge tracking
//!
//! Faucet-wide problems (a permanent verdict, an outage, repeated proxy
//! failures) trip a circuit breaker independent of any single job's retry
//! policy: the faucet as a whole is cooled down, and no job for it may launch
//! until the cooldown passes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::classify::ErrorType;

// ============================================================================
// Backoff State
// ============================================================================

/// Failure bookkeeping for a single faucet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaucetBackoffState {
    /// Failures since the last success
    pub consecutive_failures: u32,

    /// While set and in the future, no job for this faucet may launch
    pub next_allowed_time: Option<DateTime<Utc>>,

    /// Most recent error types, newest last, bounded by the history cap
    pub error_history: VecDeque<ErrorType>,
}

impl FaucetBackoffState {
    fn push_error(&mut self, error_type: ErrorType, cap: usize) {
        self.error_history.push_back(error_type);
        while self.error_history.len() > cap {
            self.error_history.pop_front();
        }
    }

    fn recent_count(&self, error_type: ErrorType) -> usize {
        self.error_history.iter().filter(|e| **e == error_type).count()
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Circuit-breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker trips on its own
    pub threshold: u32,

    /// Cooldown applied when the breaker trips
    pub cooldown_secs: u64,

    /// Recent proxy-issue count that trips the breaker
    pub proxy_issue_trip: usize,

    /// Bound on the per-faucet error history
    pub history_cap: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_secs: 1_800,
            proxy_issue_trip: 3,
            history_cap: 10,
        }
    }
}

/// Per-faucet circuit breaker
///
/// Not internally synchronized; the scheduler owns it behind its state lock.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    states: HashMap<String, FaucetBackoffState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Whether the breaker currently blocks this faucet
    ///
    /// An expired cooldown closes the breaker and resets the failure count,
    /// giving the faucet a clean slate.
    pub fn is_open(&mut self, faucet: &str, now: DateTime<Utc>) -> bool {
        let Some(state) = self.states.get_mut(faucet) else {
            return false;
        };
        match state.next_allowed_time {
            Some(until) if until > now => true,
            Some(_) => {
                state.next_allowed_time = None;
                state.consecutive_failures = 0;
                tracing::info!(faucet = %faucet, "Circuit breaker cooldown expired");
                false
            }
            None => false,
        }
    }

    /// Cooldown expiry for a tripped faucet, if any
    pub fn open_until(&self, faucet: &str) -> Option<DateTime<Utc>> {
        self.states.get(faucet).and_then(|s| s.next_allowed_time)
    }

    /// Record a failed attempt; returns `true` when this failure tripped the
    /// breaker
    pub fn record_failure(
        &mut self,
        faucet: &str,
        error_type: ErrorType,
        now: DateTime<Utc>,
    ) -> bool {
        let cap = self.config.history_cap;
        let state = self.states.entry(faucet.to_string()).or_default();
        state.consecutive_failures += 1;
        state.push_error(error_type, cap);

        let trip = error_type.trips_breaker_immediately()
            || (error_type == ErrorType::ProxyIssue
                && state.recent_count(ErrorType::ProxyIssue) >= self.config.proxy_issue_trip)
            || state.consecutive_failures >= self.config.threshold;

        if trip && state.next_allowed_time.map_or(true, |t| t <= now) {
            let until = now + Duration::seconds(self.config.cooldown_secs as i64);
            state.next_allowed_time = Some(until);
            tracing::warn!(
                faucet = %faucet,
                error_type = %error_type,
                failures = state.consecutive_failures,
                until = %until,
                "Circuit breaker tripped"
            );
            return true;
        }
        false
    }

    /// Reset a faucet after a successful run
    pub fn record_success(&mut self, faucet: &str) {
        if let Some(state) = self.states.get_mut(faucet) {
            state.consecutive_failures = 0;
            state.next_allowed_time = None;
            state.error_history.clear();
        }
    }

    /// Current state snapshot for a faucet
    pub fn state(&self, faucet: &str) -> Option<&FaucetBackoffState> {
        self.states.get(faucet)
    }
}

// ============================================================================
// Security Retry Tracking
// ============================================================================

/// Per-account security-challenge bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRetryState {
    pub security_retries: u32,
    pub last_retry_time: DateTime<Utc>,
}

/// Tracks security-challenge failures per `(faucet, username)`
///
/// A stale entry (last retry more than the reset window ago) auto-resets to
/// zero; once the retry cap is reached the job is dropped rather than
/// rescheduled.
#[derive(Debug)]
pub struct SecurityRetryTracker {
    max_retries: u32,
    reset_window: Duration,
    entries: HashMap<(String, String), SecurityRetryState>,
}

impl SecurityRetryTracker {
    pub fn new(max_retries: u32, reset_window_hours: i64) -> Self {
        Self {
            max_retries,
            reset_window: Duration::hours(reset_window_hours),
            entries: HashMap::new(),
        }
    }

    /// Record one security-challenge failure; returns `true` while further
    /// reschedules are still allowed for this key
    pub fn record_challenge(&mut self, faucet: &str, username: &str, now: DateTime<Utc>) -> bool {
        let key = (faucet.to_string(), username.to_string());
        let state = self.entries.entry(key).or_insert(SecurityRetryState {
            security_retries: 0,
            last_retry_time: now,
        });
        if now - state.last_retry_time > self.reset_window {
            state.security_retries = 0;
        }
        state.security_retries += 1;
        state.last_retry_time = now;
        state.security_retries < self.max_retries
    }

    /// Whether this key has exhausted its security retries
    pub fn is_exhausted(&self, faucet: &str, username: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(&(faucet.to_string(), username.to_string())) {
            Some(state) if now - state.last_retry_time <= self.reset_window => {
                state.security_retries >= self.max_retries
            }
            _ => false,
        }
    }

    /// Clear counters, optionally filtered by faucet and/or username;
    /// returns the number of cleared entries
    pub fn reset(&mut self, faucet: Option<&str>, username: Option<&str>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(f, u), _| {
            let faucet_match = faucet.map_or(true, |want| f == want);
            let user_match = username.map_or(true, |want| u == want);
            !(faucet_match && user_match)
        });
        before - self.entries.len()
    }

    /// Serializable view of the current counters
    pub fn snapshot(&self) -> Vec<SecurityRetryRecord> {
        self.entries
            .iter()
            .map(|((faucet, username), state)| SecurityRetryRecord {
                faucet: faucet.clone(),
                username: username.clone(),
                state: state.clone(),
            })
            .collect()
    }

    /// Replace the counters wholesale (startup restore)
    pub fn restore(&mut self, records: Vec<SecurityRetryRecord>) {
        self.entries = records
            .into_iter()
            .map(|r| ((r.faucet, r.username), r.state))
            .collect();
    }
}

/// One persisted security-retry counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRetryRecord {
    pub faucet: String,
    pub username: String,
    pub state: SecurityRetryState,
}

// ============================================================================
// Tests
// ============================================================================
