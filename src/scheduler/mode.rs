//! Degraded operation modes
//!
//! The scheduler periodically samples global signals (eligible proxy count,
//! remaining captcha budget, recent failure rate, a manual maintenance flag
//! file) and derives an [`OperationMode`]. Each signal is evaluated
//! independently; `Maintenance` short-circuits everything else, otherwise the
//! most severe applicable signal wins. The mode drives a delay multiplier and
//! structural restrictions applied by the scheduler itself.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Operation Mode
// ============================================================================

/// Global operating state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Full capability
    Normal,
    /// Too few eligible proxies; concurrency is clamped
    LowProxy,
    /// Captcha budget nearly exhausted; expensive faucets are purged
    LowBudget,
    /// Elevated failure rate; all delays are stretched
    SlowMode,
    /// Manual flag file present; new launches are paused, the queue is kept
    Maintenance,
}

impl OperationMode {
    /// Multiplier applied to inter-job delays (domain gaps, tick pacing)
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::LowProxy | Self::LowBudget => 2.0,
            Self::SlowMode => 3.0,
            Self::Maintenance => 1.0,
        }
    }

    /// Severity for picking the winning signal (higher wins)
    pub fn severity(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::LowProxy => 1,
            Self::LowBudget => 2,
            Self::SlowMode => 3,
            Self::Maintenance => 4,
        }
    }

    /// Whether new job launches are paused entirely
    pub fn pauses_admission(&self) -> bool {
        matches!(self, Self::Maintenance)
    }

    /// Whether global concurrency should be clamped
    pub fn clamps_concurrency(&self) -> bool {
        matches!(self, Self::LowProxy)
    }

    /// Whether queued jobs for known-expensive faucets should be purged
    pub fn purges_expensive(&self) -> bool {
        matches!(self, Self::LowBudget)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::LowProxy => "low_proxy",
            Self::LowBudget => "low_budget",
            Self::SlowMode => "slow_mode",
            Self::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Thresholds for mode detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    /// How often the full mode check runs, in seconds
    pub check_interval_secs: u64,

    /// Eligible proxies below this count trigger `LowProxy`
    pub low_proxy_threshold: usize,

    /// Remaining budget (USD) below this triggers `LowBudget`
    pub low_budget_threshold_usd: f64,

    /// Failure rate above this triggers `SlowMode`
    pub failure_rate_threshold: f64,

    /// Minimum completed jobs in the window before the rate is trusted
    pub failure_rate_min_samples: usize,

    /// Presence of this file forces `Maintenance`
    pub maintenance_flag: PathBuf,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            low_proxy_threshold: 3,
            low_budget_threshold_usd: 1.0,
            failure_rate_threshold: 0.5,
            failure_rate_min_samples: 10,
            maintenance_flag: PathBuf::from("data/MAINTENANCE"),
        }
    }
}

/// Sampled global signals feeding mode detection
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeSignals {
    pub eligible_proxies: usize,
    pub remaining_budget_usd: f64,
    /// `None` until enough jobs completed in the window
    pub recent_failure_rate: Option<f64>,
    pub maintenance_flag_present: bool,
}

/// Samples signals and selects the effective [`OperationMode`]
#[derive(Debug, Clone, Default)]
pub struct OperationModeDetector {
    config: ModeConfig,
}

impl OperationModeDetector {
    pub fn new(config: ModeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    /// Whether the manual maintenance flag file is present
    pub fn maintenance_flag_present(&self) -> bool {
        self.config.maintenance_flag.exists()
    }

    /// Select the effective mode for a set of signals
    pub fn detect(&self, signals: &ModeSignals) -> OperationMode {
        if signals.maintenance_flag_present {
            return OperationMode::Maintenance;
        }

        let mut mode = OperationMode::Normal;
        let mut consider = |candidate: OperationMode| {
            if candidate.severity() > mode.severity() {
                mode = candidate;
            }
        };

        if signals.eligible_proxies < self.config.low_proxy_threshold {
            consider(OperationMode::LowProxy);
        }
        if signals.remaining_budget_usd < self.config.low_budget_threshold_usd {
            consider(OperationMode::LowBudget);
        }
        if let Some(rate) = signals.recent_failure_rate {
            if rate > self.config.failure_rate_threshold {
                consider(OperationMode::SlowMode);
            }
        }

        mode
    }
}

// ============================================================================
// Tests
// ============================================================================
