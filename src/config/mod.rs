//! Configuration management for the spigot scheduler
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. All scheduling policy knobs (breaker thresholds,
//! retry delays, mode thresholds, the cost margin) live here so deployments
//! can tune them without a rebuild.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::faucet::AccountProfile;
use crate::proxy::ProxyConfig;
use crate::scheduler::breaker::BreakerConfig;
use crate::scheduler::classify::{default_blocking_keywords, RetryPolicy};
use crate::scheduler::mode::ModeConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler configuration
    pub scheduler: SchedulerSettings,

    /// Proxy pool configuration
    pub proxy: ProxyConfig,

    /// Budget configuration
    pub budget: BudgetSettings,

    /// Session persistence configuration
    pub session: SessionSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Account profiles the scheduler operates
    #[serde(default)]
    pub profiles: Vec<AccountProfile>,
}

/// Scheduler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Global cap on simultaneously running jobs
    pub max_concurrent_jobs: usize,

    /// Global cap while in low-proxy mode
    pub low_proxy_max_concurrent: usize,

    /// Minimum gap between launches against the same faucet, seconds
    pub domain_gap_secs: u64,

    /// Scheduler tick sleep, seconds
    pub tick_interval_secs: u64,

    /// Session persist / heartbeat cadence, seconds
    pub maintenance_interval_secs: u64,

    /// Deep health check (browser probe, proxy revival) cadence, seconds
    pub deep_check_interval_secs: u64,

    /// Hard timeout on one job execution, seconds
    pub job_timeout_secs: u64,

    /// Consecutive wrapper-level failures before the browser is restarted
    pub max_consecutive_job_failures: u32,

    /// Fixed retry budget for withdrawal jobs
    pub withdrawal_max_retries: u32,

    /// Security challenges allowed per (faucet, username) inside the window
    pub security_max_retries: u32,

    /// Security-retry auto-reset window, hours
    pub security_reset_hours: i64,

    /// Status phrases treated as a security challenge
    pub security_keywords: Vec<String>,

    /// Anti-bot phrases that downgrade a Permanent verdict to RateLimit
    pub blocking_keywords: Vec<String>,

    /// Timer-drift history ring size per faucet
    pub timer_history_size: usize,

    /// Attempt cost must stay below `cost_margin` x recent average earnings
    pub cost_margin: f64,

    /// Success rate below this (with enough attempts) auto-suspends a faucet
    pub min_success_rate: f64,

    /// Attempts required before the success-rate suspension applies
    pub suspension_min_attempts: u64,

    /// Circuit-breaker thresholds
    pub breaker: BreakerConfig,

    /// Per-error-type retry delays
    pub retry: RetryPolicy,

    /// Operation-mode detection thresholds
    pub mode: ModeConfig,
}

/// Budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSettings {
    /// Daily captcha budget, USD
    pub daily_budget_usd: f64,
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session snapshot file
    pub session_path: PathBuf,

    /// Heartbeat file
    pub heartbeat_path: PathBuf,

    /// Numbered backups to keep for the session file
    pub max_backups: usize,

    /// Analytics JSONL file for job outcomes
    pub analytics_path: PathBuf,

    /// Persisted security-retry counters
    pub security_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Every value falls back to its default; only commonly tuned knobs have
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("SPIGOT_MAX_CONCURRENT_JOBS") {
            config.scheduler.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parse::<u64>("SPIGOT_DOMAIN_GAP_SECS") {
            config.scheduler.domain_gap_secs = v;
        }
        if let Some(v) = env_parse::<f64>("SPIGOT_DAILY_BUDGET_USD") {
            config.budget.daily_budget_usd = v;
        }
        if let Ok(v) = std::env::var("SPIGOT_PROXY_LIST") {
            config.proxy.list_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("SPIGOT_PROXY_API_URL") {
            config.proxy.api_url = Some(v);
        }
        if let Ok(v) = std::env::var("SPIGOT_SESSION_PATH") {
            config.session.session_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SPIGOT_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("SPIGOT_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.scheduler.low_proxy_max_concurrent > self.scheduler.max_concurrent_jobs {
            anyhow::bail!("low_proxy_max_concurrent cannot exceed max_concurrent_jobs");
        }

        if self.scheduler.cost_margin < 1.0 {
            anyhow::bail!("cost_margin must be at least 1.0");
        }

        if !(0.0..=1.0).contains(&self.scheduler.min_success_rate) {
            anyhow::bail!("min_success_rate must be between 0.0 and 1.0");
        }

        if self.scheduler.security_max_retries == 0 {
            anyhow::bail!("security_max_retries must be greater than 0");
        }

        if self.budget.daily_budget_usd < 0.0 {
            anyhow::bail!("daily_budget_usd must not be negative");
        }

        for profile in &self.profiles {
            if profile.faucets.is_empty() {
                anyhow::bail!("profile '{}' lists no faucets", profile.id);
            }
        }

        Ok(())
    }

    /// Get job timeout as Duration
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.job_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings {
                max_concurrent_jobs: 4,
                low_proxy_max_concurrent: 1,
                domain_gap_secs: 60,
                tick_interval_secs: 10,
                maintenance_interval_secs: 300,
                deep_check_interval_secs: 900,
                job_timeout_secs: 600,
                max_consecutive_job_failures: 5,
                withdrawal_max_retries: 3,
                security_max_retries: 3,
                security_reset_hours: 24,
                security_keywords: vec![
                    String::from("security check"),
                    String::from("verify your identity"),
                    String::from("suspicious login"),
                    String::from("2fa"),
                ],
                blocking_keywords: default_blocking_keywords(),
                timer_history_size: 20,
                cost_margin: 2.0,
                min_success_rate: 0.2,
                suspension_min_attempts: 10,
                breaker: BreakerConfig::default(),
                retry: RetryPolicy::default(),
                mode: ModeConfig::default(),
            },
            proxy: ProxyConfig::default(),
            budget: BudgetSettings {
                daily_budget_usd: 5.0,
            },
            session: SessionSettings {
                session_path: PathBuf::from("data/session.json"),
                heartbeat_path: PathBuf::from("data/heartbeat.json"),
                max_backups: 3,
                analytics_path: PathBuf::from("data/outcomes.jsonl"),
                security_path: PathBuf::from("data/security_retries.json"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
            profiles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_concurrent_jobs() {
        let mut config = Config::default();
        config.scheduler.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cost_margin_below_one_rejected() {
        let mut config = Config::default();
        config.scheduler.cost_margin = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_without_faucets_rejected() {
        let mut config = Config::default();
        config.profiles.push(AccountProfile {
            id: "p1".to_string(),
            username: "alice".to_string(),
            faucets: vec![],
            max_concurrent_jobs: 1,
            proxy_strategy: Default::default(),
            wallet_address: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(
            parsed.scheduler.max_concurrent_jobs,
            config.scheduler.max_concurrent_jobs
        );
        assert_eq!(parsed.scheduler.cost_margin, config.scheduler.cost_margin);
    }

    #[test]
    fn test_job_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.job_timeout(), Duration::from_secs(600));
    }
}
