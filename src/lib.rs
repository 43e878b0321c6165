//! spigot - Faucet Job Scheduling & Resilience Engine
//!
//! A scheduling engine for running periodic claim and withdrawal jobs against
//! many rate-limited, frequently blocking faucet targets under shared proxy
//! and budget constraints.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Job queue, error classification, circuit breaker,
//!   timer-drift prediction, operation modes, and the driving loop
//! - [`proxy`] - Proxy pool with health tracking, rotation, and persistence
//! - [`session`] - Atomic session persistence and the heartbeat file
//! - [`faucet`] - External-collaborator seams (executors, browser, budget,
//!   analytics)
//! - [`metrics`] - Prometheus counters and gauges
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use spigot::config::Config;
//! use spigot::faucet::{ExecutorRegistry, FixedBudget, JsonlAnalytics, NoopBrowser};
//! use spigot::proxy::ProxyManager;
//! use spigot::scheduler::JobScheduler;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let proxy = Arc::new(ProxyManager::new(config.proxy.clone()));
//!     let scheduler = JobScheduler::new(
//!         &config,
//!         ExecutorRegistry::new(),
//!         Arc::new(NoopBrowser::new()),
//!         Arc::new(FixedBudget::new(config.budget.daily_budget_usd)),
//!         Arc::new(JsonlAnalytics::new(&config.session.analytics_path)),
//!         proxy,
//!     );
//!     // scheduler.scheduler_loop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod faucet;
pub mod metrics;
pub mod proxy;
pub mod scheduler;
pub mod session;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::faucet::{AccountProfile, ClaimOutcome, ExecutorRegistry, FaucetExecutor};
    pub use crate::proxy::{ProxyEndpoint, ProxyManager, RotationStrategy};
    pub use crate::scheduler::{ErrorType, Job, JobKind, JobScheduler, OperationMode};
    pub use crate::session::{Heartbeat, SessionStore};
}

// Direct re-exports for convenience
pub use scheduler::{Job, JobKind, JobScheduler};
