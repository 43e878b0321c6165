//! Job scheduling and resilience engine
//!
//! This module provides the scheduling infrastructure for running periodic
//! claim and withdrawal jobs against many rate-limited, frequently blocking
//! faucet targets under shared proxy and budget constraints.
//!
//! # Overview
//!
//! A single cooperative loop owns the priority queue and decides, every
//! tick, which ready jobs may launch. Every failure funnels through one error
//! taxonomy before any retry decision; faucet-wide problems trip a circuit
//! breaker independent of per-job retries; global health signals derive a
//! degraded operation mode that stretches delays, clamps concurrency, or
//! pauses admission entirely.
//!
//! # Features
//!
//! - **Priority Queue**: total order by `(priority, next_run)` with
//!   `(profile, name)` deduplication
//! - **Error Taxonomy**: explicit tags plus keyword heuristics, with a
//!   blocking-language downgrade for misreported bans
//! - **Circuit Breaker**: per-faucet trip thresholds, immediate trips for
//!   outages and bans, cooldown with clean-slate reset
//! - **Security Retries**: per-account challenge budget with 24 h auto-reset
//! - **Timer Drift**: per-faucet stated-versus-actual claim timer prediction
//! - **Operation Modes**: normal / low-proxy / low-budget / slow / maintenance
//!   with per-mode delay multipliers
//!
//! # Modules
//!
//! - [`job`] - Job model and the sorted queue
//! - [`classify`] - Error taxonomy and retry delays
//! - [`breaker`] - Circuit breaker and security-retry tracking
//! - [`drift`] - Claim-timer drift prediction
//! - [`mode`] - Operation-mode detection
//! - [`core`] - The `JobScheduler` driving loop

pub mod breaker;
pub mod classify;
pub mod core;
pub mod drift;
pub mod error;
pub mod job;
pub mod mode;

pub use breaker::{BreakerConfig, CircuitBreaker, FaucetBackoffState, SecurityRetryTracker};
pub use classify::{classify, ErrorType, RetryPolicy};
pub use core::{JobScheduler, PriorityFn};
pub use drift::TimerDriftTracker;
pub use error::{SchedulerError, SchedulerResult};
pub use job::{Job, JobKey, JobKind, JobQueue};
pub use mode::{ModeConfig, ModeSignals, OperationMode, OperationModeDetector};
