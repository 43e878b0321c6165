//! External collaborator seams
//!
//! The scheduler never talks to a faucet site, a captcha solver, or a wallet
//! directly. Everything outside the scheduling engine is reached through the
//! narrow traits in this module: a [`FaucetExecutor`] performs the actual
//! claim/withdrawal flow against a page, a [`BrowserManager`] owns browser
//! context lifecycle, a [`BudgetProvider`] answers budget and earnings
//! queries, and an [`AnalyticsSink`] receives outcome records.
//!
//! Per-site executors are resolved through a closed [`ExecutorRegistry`]
//! keyed by a normalized faucet identifier, with a substring fallback for
//! loosely spelled names.

pub mod browser;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::proxy::rotation::RotationStrategy;
use crate::scheduler::classify::ErrorType;
use crate::scheduler::job::JobKind;

pub use browser::{BrowserManager, PageHandle};
pub use local::{FixedBudget, JsonlAnalytics, NoopBrowser};

// ============================================================================
// Account Profiles
// ============================================================================

/// An account the scheduler operates on behalf of
///
/// Profiles are owned by configuration; jobs reference them by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Stable profile identifier
    pub id: String,

    /// Login username at the faucet sites
    pub username: String,

    /// Faucets this profile claims from
    pub faucets: Vec<String>,

    /// Per-profile concurrency cap
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: u32,

    /// Proxy rotation strategy for this profile
    #[serde(default)]
    pub proxy_strategy: RotationStrategy,

    /// Withdrawal destination, if withdrawals are enabled for this profile
    #[serde(default)]
    pub wallet_address: Option<String>,
}

fn default_max_concurrent() -> u32 {
    1
}

// ============================================================================
// Job Results
// ============================================================================

/// Result of one executed job
///
/// Optional fields default as documented so executors only fill in what the
/// site actually reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimOutcome {
    /// Whether the claim/withdrawal succeeded
    pub success: bool,

    /// Free-text status from the site or the executor; feeds classification
    pub status: String,

    /// Stated wait until the next claim, in minutes (default: 60)
    #[serde(default = "default_next_claim_minutes")]
    pub next_claim_minutes: f64,

    /// Amount claimed or withdrawn, if reported (default: None)
    #[serde(default)]
    pub amount: Option<f64>,

    /// Currency of `amount`, if reported (default: None)
    #[serde(default)]
    pub currency: Option<String>,

    /// Account balance after the operation, if reported (default: None)
    #[serde(default)]
    pub balance: Option<f64>,

    /// Explicit error classification; takes precedence over status-text
    /// heuristics (default: None)
    #[serde(default)]
    pub error_type: Option<ErrorType>,
}

fn default_next_claim_minutes() -> f64 {
    60.0
}

impl Default for ClaimOutcome {
    fn default() -> Self {
        Self {
            success: false,
            status: String::new(),
            next_claim_minutes: 60.0,
            amount: None,
            currency: None,
            balance: None,
            error_type: None,
        }
    }
}

impl ClaimOutcome {
    /// Successful outcome with a stated next-claim timer
    pub fn ok(status: impl Into<String>, next_claim_minutes: f64) -> Self {
        Self {
            success: true,
            status: status.into(),
            next_claim_minutes,
            ..Self::default()
        }
    }

    /// Failed outcome classified from the status text
    pub fn failed(status: impl Into<String>) -> Self {
        Self {
            success: false,
            status: status.into(),
            ..Self::default()
        }
    }

    /// Failed outcome with an explicit error tag
    pub fn failed_with(status: impl Into<String>, error_type: ErrorType) -> Self {
        Self {
            success: false,
            status: status.into(),
            error_type: Some(error_type),
            ..Self::default()
        }
    }
}

// ============================================================================
// Executor Registry
// ============================================================================

/// Performs the site-specific claim/withdrawal flow for one faucet
#[async_trait]
pub trait FaucetExecutor: Send + Sync {
    /// Canonical faucet identifier this executor handles
    fn faucet(&self) -> &str;

    /// Run one job against an acquired page
    async fn run(
        &self,
        page: &PageHandle,
        profile: &AccountProfile,
        kind: JobKind,
    ) -> anyhow::Result<ClaimOutcome>;
}

/// Normalize a faucet identifier: lowercase, separators stripped
pub fn normalize_faucet_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Closed registry of per-faucet executors
///
/// Lookup is by normalized key with a substring fallback, so "fire-faucet"
/// and "FireFaucet.win" both resolve to the executor registered as
/// "firefaucet".
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn FaucetExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its canonical faucet name
    pub fn register(&mut self, executor: Arc<dyn FaucetExecutor>) {
        let key = normalize_faucet_key(executor.faucet());
        if self.executors.insert(key.clone(), executor).is_some() {
            tracing::warn!(faucet = %key, "Replaced previously registered executor");
        }
    }

    /// Resolve an executor for a faucet identifier
    pub fn resolve(&self, faucet: &str) -> Option<Arc<dyn FaucetExecutor>> {
        let key = normalize_faucet_key(faucet);
        if let Some(executor) = self.executors.get(&key) {
            return Some(Arc::clone(executor));
        }
        // Substring fallback in both directions.
        self.executors
            .iter()
            .find(|(k, _)| k.contains(&key) || key.contains(k.as_str()))
            .map(|(_, e)| Arc::clone(e))
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Registered canonical keys
    pub fn faucets(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

// ============================================================================
// Budget & Analytics
// ============================================================================

/// Recent economics of one faucet, used for auto-suspension and the
/// unprofitability check
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaucetEconomics {
    /// Average earnings per successful claim, USD
    pub avg_earnings_usd: f64,

    /// Success rate over the recent window, 0.0 - 1.0
    pub success_rate: f64,

    /// Estimated cost per attempt (captcha solves, proxy traffic), USD
    pub estimated_cost_usd: f64,

    /// Attempts in the window
    pub attempts: u64,
}

/// Budget and earnings queries consumed by the scheduler
#[async_trait]
pub trait BudgetProvider: Send + Sync {
    /// Captcha budget remaining for today, USD
    async fn remaining_budget_usd(&self) -> anyhow::Result<f64>;

    /// Whether today's budget is fully spent
    async fn daily_budget_exhausted(&self) -> anyhow::Result<bool>;

    /// Recent economics for a faucet, `None` when unknown
    async fn faucet_economics(&self, faucet: &str) -> anyhow::Result<Option<FaucetEconomics>>;
}

/// One recorded job outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcomeRecord {
    pub run_id: Uuid,
    pub faucet: String,
    pub profile_id: String,
    pub kind: JobKind,
    pub success: bool,
    pub status: String,
    pub error_type: Option<ErrorType>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Receives outcome records; failures here are logged, never propagated
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record_outcome(&self, record: &JobOutcomeRecord) -> anyhow::Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
