//! The scheduler driving loop
//!
//! One cooperative async loop owns admission: it samples the operation mode,
//! runs time-gated maintenance, scans the queue for ready jobs, applies the
//! skip conditions (circuit breaker, concurrency caps, domain gaps,
//! profitability), and spawns each launched job into its own wrapper task.
//! The wrapper owns the whole job lifecycle: proxy and page acquisition,
//! execution with a hard timeout, outcome classification, rescheduling, and
//! cleanup that runs no matter how the job ended.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{Config, SchedulerSettings};
use crate::faucet::{
    AccountProfile, AnalyticsSink, BrowserManager, BudgetProvider, ClaimOutcome,
    ExecutorRegistry, JobOutcomeRecord, PageHandle,
};
use crate::metrics;
use crate::proxy::ProxyManager;
use crate::session::{Heartbeat, SessionSnapshot, SessionStore};

use super::breaker::{CircuitBreaker, SecurityRetryTracker};
use super::classify::{classify, ErrorType};
use super::drift::TimerDriftTracker;
use super::error::{SchedulerError, SchedulerResult};
use super::job::{Job, JobKey, JobKind, JobQueue};
use super::mode::{ModeSignals, OperationMode, OperationModeDetector};

/// Window of recent job results feeding the failure-rate signal
const RESULT_WINDOW: usize = 50;

/// Deferral applied to unprofitable or suspended jobs
const UNPROFITABLE_DEFER_SECS: i64 = 3_600;

/// Optional per-job priority override; `None` falls back to the job's static
/// priority
pub type PriorityFn = Box<dyn Fn(&Job) -> Option<i32> + Send + Sync>;

// ============================================================================
// Scheduler State
// ============================================================================

#[derive(Default)]
struct SchedulerState {
    queue: JobQueue,
    running: HashSet<JobKey>,
    running_per_profile: HashMap<String, u32>,
    domain_last_access: HashMap<String, DateTime<Utc>>,
    mode: Option<OperationMode>,
    last_mode_check: Option<DateTime<Utc>>,
    last_maintenance: Option<DateTime<Utc>>,
    last_deep_check: Option<DateTime<Utc>>,
    recent_results: VecDeque<bool>,
    withdrawals_generated: bool,
}

impl SchedulerState {
    fn mode(&self) -> OperationMode {
        self.mode.unwrap_or(OperationMode::Normal)
    }

    fn record_result(&mut self, success: bool) {
        self.recent_results.push_back(success);
        while self.recent_results.len() > RESULT_WINDOW {
            self.recent_results.pop_front();
        }
    }

    fn failure_rate(&self, min_samples: usize) -> Option<f64> {
        if self.recent_results.len() < min_samples {
            return None;
        }
        let failures = self.recent_results.iter().filter(|s| !**s).count();
        Some(failures as f64 / self.recent_results.len() as f64)
    }
}

// ============================================================================
// Job Scheduler
// ============================================================================

/// Drives job admission and execution for all configured profiles
pub struct JobScheduler {
    settings: SchedulerSettings,
    profiles: HashMap<String, AccountProfile>,
    registry: ExecutorRegistry,
    browser: Arc<dyn BrowserManager>,
    budget: Arc<dyn BudgetProvider>,
    analytics: Arc<dyn AnalyticsSink>,
    proxy: Arc<ProxyManager>,
    session_store: SessionStore,
    heartbeat_path: std::path::PathBuf,
    security_path: std::path::PathBuf,
    detector: OperationModeDetector,

    state: RwLock<SchedulerState>,
    breaker: RwLock<CircuitBreaker>,
    security: RwLock<SecurityRetryTracker>,
    drift: RwLock<TimerDriftTracker>,

    consecutive_job_failures: AtomicU32,
    stop_flag: AtomicBool,
    dynamic_priority: Option<PriorityFn>,
}

impl JobScheduler {
    pub fn new(
        config: &Config,
        registry: ExecutorRegistry,
        browser: Arc<dyn BrowserManager>,
        budget: Arc<dyn BudgetProvider>,
        analytics: Arc<dyn AnalyticsSink>,
        proxy: Arc<ProxyManager>,
    ) -> Arc<Self> {
        let settings = config.scheduler.clone();
        let profiles = config
            .profiles
            .iter()
            .cloned()
            .map(|p| (p.id.clone(), p))
            .collect();

        Arc::new(Self {
            profiles,
            registry,
            browser,
            budget,
            analytics,
            proxy,
            session_store: SessionStore::new(
                config.session.session_path.clone(),
                config.session.max_backups,
            ),
            heartbeat_path: config.session.heartbeat_path.clone(),
            security_path: config.session.security_path.clone(),
            detector: OperationModeDetector::new(settings.mode.clone()),
            state: RwLock::new(SchedulerState::default()),
            breaker: RwLock::new(CircuitBreaker::new(settings.breaker.clone())),
            security: RwLock::new(SecurityRetryTracker::new(
                settings.security_max_retries,
                settings.security_reset_hours,
            )),
            drift: RwLock::new(TimerDriftTracker::new(settings.timer_history_size)),
            consecutive_job_failures: AtomicU32::new(0),
            stop_flag: AtomicBool::new(false),
            dynamic_priority: None,
            settings,
        })
    }

    /// Install a dynamic-priority callback; must be called before the
    /// scheduler is shared
    pub fn with_dynamic_priority(mut self: Arc<Self>, f: PriorityFn) -> Arc<Self> {
        if let Some(inner) = Arc::get_mut(&mut self) {
            inner.dynamic_priority = Some(f);
        }
        self
    }

    // ------------------------------------------------------------------
    // Queue operations
    // ------------------------------------------------------------------

    /// Enqueue a job
    ///
    /// Rejects unknown profiles and `(profile, name)` duplicates, whether the
    /// duplicate is queued or currently running. A dynamic-priority lookup
    /// that returns nothing falls back to the job's static priority.
    pub async fn add_job(&self, mut job: Job) -> SchedulerResult<()> {
        if !self.profiles.contains_key(&job.profile_id) {
            return Err(SchedulerError::UnknownProfile {
                profile_id: job.profile_id,
            });
        }

        if let Some(f) = &self.dynamic_priority {
            if let Some(priority) = f(&job) {
                job.priority = priority;
            }
        }

        let mut state = self.state.write().await;
        let key = job.key();
        if state.running.contains(&key) || !state.queue.insert(job) {
            return Err(SchedulerError::DuplicateJob {
                profile_id: key.profile_id,
                name: key.name,
            });
        }
        metrics::update_scheduler_gauges(state.queue.len(), state.running.len());
        Ok(())
    }

    /// Remove queued jobs matching the predicate, plus per-domain bookkeeping
    /// tied only to them; returns the number removed
    pub async fn purge_jobs<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.write().await;
        let removed = state.queue.purge(&predicate);
        for job in &removed {
            if !state.queue.has_faucet(&job.faucet) {
                state.domain_last_access.remove(&job.faucet);
            }
        }
        metrics::update_scheduler_gauges(state.queue.len(), state.running.len());
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Purged jobs from queue");
        }
        removed.len()
    }

    pub async fn queue_depth(&self) -> usize {
        self.state.read().await.queue.len()
    }

    pub async fn running_count(&self) -> usize {
        self.state.read().await.running.len()
    }

    pub async fn current_mode(&self) -> OperationMode {
        self.state.read().await.mode()
    }

    /// Record a stated-versus-actual timer observation
    pub async fn record_timer_observation(&self, faucet: &str, stated: f64, actual: f64) {
        self.drift.write().await.record_observation(faucet, stated, actual);
    }

    /// Clear security-retry counters, optionally filtered
    pub async fn reset_security_retries(
        &self,
        faucet: Option<&str>,
        username: Option<&str>,
    ) -> usize {
        self.security.write().await.reset(faucet, username)
    }

    /// Request a cooperative stop; the loop persists the session and exits
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Session persistence
    // ------------------------------------------------------------------

    /// Restore queue and domain bookkeeping from the session store
    pub async fn restore_session(&self) -> SchedulerResult<usize> {
        let Some(snapshot) = self.session_store.load()? else {
            return Ok(0);
        };
        // Jobs for profiles that no longer exist are dropped at restore.
        let jobs: Vec<Job> = snapshot
            .queue
            .into_iter()
            .filter(|j| {
                let known = self.profiles.contains_key(&j.profile_id);
                if !known {
                    tracing::warn!(
                        profile = %j.profile_id,
                        job = %j.name,
                        "Dropping restored job for unknown profile"
                    );
                }
                known
            })
            .collect();

        let mut state = self.state.write().await;
        let count = jobs.len();
        state.queue.replace(jobs);
        state.domain_last_access = snapshot.domain_last_access;
        metrics::update_scheduler_gauges(state.queue.len(), state.running.len());
        drop(state);

        if self.security_path.exists() {
            match std::fs::read_to_string(&self.security_path)
                .map_err(SchedulerError::from)
                .and_then(|body| Ok(serde_json::from_str(&body)?))
            {
                Ok(records) => self.security.write().await.restore(records),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unreadable security-retry state")
                }
            }
        }

        tracing::info!(jobs = count, "Session restored");
        Ok(count)
    }

    /// Persist the security-retry counters
    pub async fn persist_security(&self) -> SchedulerResult<()> {
        let snapshot = self.security.read().await.snapshot();
        if let Some(parent) = self.security_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.security_path, body)?;
        Ok(())
    }

    /// Persist the current queue and domain bookkeeping
    pub async fn persist_session(&self) -> SchedulerResult<()> {
        let snapshot = {
            let state = self.state.read().await;
            SessionSnapshot::new(
                state.queue.iter().cloned().collect(),
                state.domain_last_access.clone(),
            )
        };
        self.session_store.save(&snapshot)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Driving loop
    // ------------------------------------------------------------------

    /// Run the scheduler until [`stop`](Self::stop) is called
    pub async fn scheduler_loop(self: Arc<Self>) {
        tracing::info!(
            profiles = self.profiles.len(),
            executors = self.registry.len(),
            "Scheduler loop starting"
        );

        while !self.is_stopped() {
            let now = Utc::now();

            self.refresh_mode_if_due(now).await;
            self.generate_withdrawal_jobs_once(now).await;
            self.run_maintenance_if_due(now).await;

            let paused = self.state.read().await.mode().pauses_admission();
            if !paused {
                Arc::clone(&self).launch_ready_jobs(now).await;
            }

            tokio::time::sleep(std::time::Duration::from_secs(
                self.settings.tick_interval_secs.max(1),
            ))
            .await;
        }

        if let Err(e) = self.persist_session().await {
            tracing::error!(error = %e, "Final session persist failed");
        }
        tracing::info!("Scheduler loop stopped");
    }

    /// Recompute the operation mode, rate-limited to the configured interval
    async fn refresh_mode_if_due(&self, now: DateTime<Utc>) {
        let interval = ChronoDuration::seconds(self.settings.mode.check_interval_secs as i64);
        {
            let state = self.state.read().await;
            if let Some(last) = state.last_mode_check {
                if now - last < interval && state.mode.is_some() {
                    return;
                }
            }
        }

        let remaining_budget = match self.budget.remaining_budget_usd().await {
            Ok(v) => v,
            Err(e) => {
                // An unanswerable budget query must not force LowBudget.
                tracing::warn!(error = %e, "Budget query failed during mode check");
                f64::MAX
            }
        };
        let eligible = self.proxy.eligible_count().await;

        let mut state = self.state.write().await;
        let signals = ModeSignals {
            eligible_proxies: eligible,
            remaining_budget_usd: remaining_budget,
            recent_failure_rate: state.failure_rate(self.settings.mode.failure_rate_min_samples),
            maintenance_flag_present: self.detector.maintenance_flag_present(),
        };
        let new_mode = self.detector.detect(&signals);
        let old_mode = state.mode;
        state.mode = Some(new_mode);
        state.last_mode_check = Some(now);
        drop(state);

        metrics::update_operation_mode(new_mode.severity());
        if old_mode != Some(new_mode) {
            tracing::info!(
                from = %old_mode.map(|m| m.as_str()).unwrap_or("unset"),
                to = %new_mode,
                "Operation mode changed"
            );
            if new_mode.purges_expensive() {
                self.purge_expensive_faucets().await;
            }
        }
    }

    /// Drop queued claims against faucets whose cost exceeds the margin
    async fn purge_expensive_faucets(&self) {
        let faucets: HashSet<String> = {
            let state = self.state.read().await;
            state.queue.iter().map(|j| j.faucet.clone()).collect()
        };

        let mut expensive = Vec::new();
        for faucet in faucets {
            match self.budget.faucet_economics(&faucet).await {
                Ok(Some(e))
                    if e.estimated_cost_usd
                        > self.settings.cost_margin * e.avg_earnings_usd =>
                {
                    expensive.push(faucet);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(faucet = %faucet, error = %e, "Economics query failed"),
            }
        }

        if !expensive.is_empty() {
            tracing::warn!(faucets = ?expensive, "Purging expensive faucets in low-budget mode");
            let purged = self
                .purge_jobs(|j| j.kind == JobKind::Claim && expensive.contains(&j.faucet))
                .await;
            for faucet in &expensive {
                metrics::record_job_dropped(faucet, "low_budget");
            }
            tracing::info!(purged, "Low-budget purge complete");
        }
    }

    /// First-tick generation of withdrawal work: recurring per-faucet
    /// withdrawals for profiles with a wallet, plus one balance sweep
    async fn generate_withdrawal_jobs_once(&self, now: DateTime<Utc>) {
        {
            let state = self.state.read().await;
            if state.withdrawals_generated {
                return;
            }
        }

        let mut jobs = Vec::new();
        let mut sweep_added = false;
        let mut profile_ids: Vec<&String> = self.profiles.keys().collect();
        profile_ids.sort();
        for profile_id in profile_ids {
            let profile = &self.profiles[profile_id];
            if profile.wallet_address.is_none() {
                continue;
            }
            for faucet in &profile.faucets {
                jobs.push(
                    Job::new(
                        10,
                        format!("withdraw:{faucet}"),
                        profile_id.clone(),
                        faucet.clone(),
                        JobKind::Withdraw,
                    )
                    .at(now + ChronoDuration::minutes(5)),
                );
            }
            if !sweep_added {
                jobs.push(Job::new(
                    20,
                    "auto_withdrawal_check",
                    profile_id.clone(),
                    profile.faucets.first().cloned().unwrap_or_default(),
                    JobKind::AutoWithdrawalCheck,
                ));
                sweep_added = true;
            }
        }

        let mut state = self.state.write().await;
        state.withdrawals_generated = true;
        let mut added = 0;
        for job in jobs {
            if !state.running.contains(&job.key()) && state.queue.insert(job) {
                added += 1;
            }
        }
        if added > 0 {
            tracing::info!(added, "Generated withdrawal jobs");
        }
    }

    /// Heartbeat/session/deep-check maintenance; each step is independently
    /// time-gated and its failure never stops the loop
    async fn run_maintenance_if_due(&self, now: DateTime<Utc>) {
        let maintenance_due = {
            let state = self.state.read().await;
            state.last_maintenance.map_or(true, |last| {
                now - last
                    >= ChronoDuration::seconds(self.settings.maintenance_interval_secs as i64)
            })
        };

        if maintenance_due {
            self.state.write().await.last_maintenance = Some(now);

            let (mode, depth, running) = {
                let state = self.state.read().await;
                (state.mode(), state.queue.len(), state.running.len())
            };
            let heartbeat = Heartbeat::new(mode.as_str(), depth, running);
            if let Err(e) = heartbeat.write(&self.heartbeat_path) {
                tracing::warn!(error = %e, "Heartbeat write failed");
            }

            if let Err(e) = self.persist_session().await {
                tracing::warn!(error = %e, "Periodic session persist failed");
            }

            if let Err(e) = self.persist_security().await {
                tracing::warn!(error = %e, "Security-retry persist failed");
            }
        }

        let deep_due = {
            let state = self.state.read().await;
            state.last_deep_check.map_or(true, |last| {
                now - last >= ChronoDuration::seconds(self.settings.deep_check_interval_secs as i64)
            })
        };

        if deep_due {
            self.state.write().await.last_deep_check = Some(now);

            if !self.browser.is_healthy().await {
                tracing::warn!("Browser unhealthy during deep check, restarting");
                if let Err(e) = self.browser.restart().await {
                    tracing::error!(error = %e, "Browser restart failed");
                }
            }

            let eligible = self.proxy.remove_dead_proxies().await;
            let total = self.proxy.total_count().await;
            metrics::update_proxy_gauges(eligible, total);
            if let Err(e) = self.proxy.save_health().await {
                tracing::warn!(error = %e, "Proxy health persist failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Scan ready jobs, apply skip conditions, launch what passes
    async fn launch_ready_jobs(self: Arc<Self>, now: DateTime<Utc>) {
        let budget_exhausted = self.budget.daily_budget_exhausted().await.unwrap_or(false);
        let ready = {
            let state = self.state.read().await;
            state.queue.ready_jobs(now)
        };

        for job in ready {
            match self.admission_check(&job, now, budget_exhausted).await {
                Admission::Launch => {
                    let launched = {
                        let mut state = self.state.write().await;
                        // The queue may have changed since the scan.
                        match state.queue.remove(&job.key()) {
                            Some(job) => {
                                state.running.insert(job.key());
                                *state
                                    .running_per_profile
                                    .entry(job.profile_id.clone())
                                    .or_insert(0) += 1;
                                state.domain_last_access.insert(job.faucet.clone(), now);
                                metrics::update_scheduler_gauges(
                                    state.queue.len(),
                                    state.running.len(),
                                );
                                Some(job)
                            }
                            None => None,
                        }
                    };
                    if let Some(job) = launched {
                        metrics::record_job_launched(&job.faucet, job.kind.as_str());
                        tokio::spawn(Arc::clone(&self).run_job_wrapper(job));
                    }
                }
                Admission::Defer(until) => {
                    let mut state = self.state.write().await;
                    state.queue.defer(&job.key(), until);
                }
                Admission::Skip => {}
                Admission::Drop(reason) => {
                    let mut state = self.state.write().await;
                    state.queue.remove(&job.key());
                    metrics::record_job_dropped(&job.faucet, reason);
                    tracing::warn!(job = %job.name, faucet = %job.faucet, reason, "Job dropped");
                }
            }
        }
    }

    async fn admission_check(
        &self,
        job: &Job,
        now: DateTime<Utc>,
        budget_exhausted: bool,
    ) -> Admission {
        // Circuit breaker first: a tripped faucet skips everything else.
        if self.breaker.write().await.is_open(&job.faucet, now) {
            return Admission::Skip;
        }

        let Some(profile) = self.profiles.get(&job.profile_id) else {
            return Admission::Drop("unknown_profile");
        };

        if self
            .security
            .read()
            .await
            .is_exhausted(&job.faucet, &profile.username, now)
        {
            return Admission::Drop("security_retries_exhausted");
        }

        {
            let state = self.state.read().await;
            let mode = state.mode();

            let cap = if mode.clamps_concurrency() {
                self.settings.low_proxy_max_concurrent
            } else {
                self.settings.max_concurrent_jobs
            };
            if state.running.len() >= cap {
                return Admission::Skip;
            }

            let profile_running = state
                .running_per_profile
                .get(&job.profile_id)
                .copied()
                .unwrap_or(0);
            if profile_running >= profile.max_concurrent_jobs {
                return Admission::Skip;
            }

            if let Some(last) = state.domain_last_access.get(&job.faucet) {
                let gap = self.settings.domain_gap_secs as f64 * mode.delay_multiplier();
                if now - *last < ChronoDuration::seconds(gap as i64) {
                    return Admission::Skip;
                }
            }
        }

        // Economics gates only apply to claims; withdrawals move money out
        // regardless of claim profitability.
        if job.kind == JobKind::Claim {
            match self.budget.faucet_economics(&job.faucet).await {
                Ok(Some(e)) => {
                    if e.attempts >= self.settings.suspension_min_attempts
                        && e.success_rate < self.settings.min_success_rate
                    {
                        tracing::warn!(
                            faucet = %job.faucet,
                            success_rate = e.success_rate,
                            "Faucet auto-suspended on low success rate"
                        );
                        return Admission::Defer(
                            now + ChronoDuration::seconds(UNPROFITABLE_DEFER_SECS),
                        );
                    }
                    if e.estimated_cost_usd > self.settings.cost_margin * e.avg_earnings_usd {
                        let until = if budget_exhausted {
                            next_utc_midnight(now)
                        } else {
                            now + ChronoDuration::seconds(UNPROFITABLE_DEFER_SECS)
                        };
                        tracing::debug!(
                            faucet = %job.faucet,
                            cost = e.estimated_cost_usd,
                            earnings = e.avg_earnings_usd,
                            "Deferring unprofitable claim"
                        );
                        return Admission::Defer(until);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(faucet = %job.faucet, error = %e, "Economics query failed")
                }
            }
        }

        Admission::Launch
    }

    // ------------------------------------------------------------------
    // Job wrapper
    // ------------------------------------------------------------------

    /// Execute one launched job end to end
    ///
    /// Cleanup (counter release, page close) runs on every path; failures in
    /// cleanup are logged, never propagated.
    pub async fn run_job_wrapper(self: Arc<Self>, job: Job) {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            job = %job.name,
            faucet = %job.faucet,
            kind = %job.kind.as_str(),
            retry = job.retry_count,
            "Job starting"
        );

        let outcome = self.execute_job(&job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Execution::Completed {
                outcome,
                proxy_key,
            } => {
                if outcome.success {
                    if let Some(key) = &proxy_key {
                        self.proxy.record_success(key, elapsed_ms).await;
                    }
                    self.handle_success(&job, run_id, outcome).await;
                } else {
                    self.handle_failure(&job, run_id, outcome, proxy_key.as_deref())
                        .await;
                }
            }
            Execution::Wrapped { status, proxy_key } => {
                // Timeouts and panics behave like transient failures, with a
                // browser-restart escalation on repeats.
                let failures = self.consecutive_job_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.settings.max_consecutive_job_failures {
                    tracing::warn!(failures, "Restarting browser after repeated job failures");
                    if let Err(e) = self.browser.restart().await {
                        tracing::error!(error = %e, "Browser restart failed");
                    }
                    self.consecutive_job_failures.store(0, Ordering::SeqCst);
                }
                self.handle_failure(
                    &job,
                    run_id,
                    ClaimOutcome::failed_with(status, ErrorType::Transient),
                    proxy_key.as_deref(),
                )
                .await;
            }
        }

        // Counter release, always.
        let mut state = self.state.write().await;
        state.running.remove(&job.key());
        if let Some(count) = state.running_per_profile.get_mut(&job.profile_id) {
            *count = count.saturating_sub(1);
        }
        metrics::update_scheduler_gauges(state.queue.len(), state.running.len());
    }

    /// Acquire proxy and page, run the executor under the hard timeout
    async fn execute_job(&self, job: &Job) -> Execution {
        let Some(profile) = self.profiles.get(&job.profile_id) else {
            return Execution::Completed {
                outcome: ClaimOutcome::failed_with(
                    format!("unknown profile {}", job.profile_id),
                    ErrorType::ConfigError,
                ),
                proxy_key: None,
            };
        };
        let Some(executor) = self.registry.resolve(&job.faucet) else {
            return Execution::Completed {
                outcome: ClaimOutcome::failed_with(
                    format!("no executor for {}", job.faucet),
                    ErrorType::ConfigError,
                ),
                proxy_key: None,
            };
        };

        let proxy = self
            .proxy
            .next_for_profile(&profile.id, profile.proxy_strategy)
            .await;
        let proxy_key = proxy.as_ref().map(|p| p.key());

        let page = match self.acquire_page_with_restart(profile, proxy.as_ref()).await {
            Ok(page) => page,
            Err(e) => {
                return Execution::Wrapped {
                    status: format!("page acquisition failed: {e}"),
                    proxy_key,
                };
            }
        };

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.settings.job_timeout_secs),
            executor.run(&page, profile, job.kind),
        )
        .await;

        if let Err(e) = self.browser.close_page(page).await {
            tracing::warn!(error = %e, "Page close failed");
        }

        match result {
            Ok(Ok(outcome)) => Execution::Completed { outcome, proxy_key },
            Ok(Err(e)) => Execution::Wrapped {
                status: format!("executor error: {e}"),
                proxy_key,
            },
            Err(_) => Execution::Wrapped {
                status: format!("job timed out after {}s", self.settings.job_timeout_secs),
                proxy_key,
            },
        }
    }

    /// Acquire a page, restarting the browser once when it reports unhealthy
    async fn acquire_page_with_restart(
        &self,
        profile: &AccountProfile,
        proxy: Option<&crate::proxy::ProxyEndpoint>,
    ) -> anyhow::Result<PageHandle> {
        match self.browser.acquire_page(profile, proxy).await {
            Ok(page) => Ok(page),
            Err(first) => {
                if self.browser.is_healthy().await {
                    return Err(first);
                }
                tracing::warn!(error = %first, "Browser unhealthy, restarting before retry");
                self.browser.restart().await?;
                self.browser.acquire_page(profile, proxy).await
            }
        }
    }

    async fn handle_success(&self, job: &Job, run_id: Uuid, outcome: ClaimOutcome) {
        let now = Utc::now();
        self.breaker.write().await.record_success(&job.faucet);
        self.consecutive_job_failures.store(0, Ordering::SeqCst);
        metrics::record_job_completed(&job.faucet);

        let predicted_minutes = {
            let mut drift = self.drift.write().await;
            drift.note_claim(&job.faucet, outcome.next_claim_minutes, now);
            drift.predict(&job.faucet, outcome.next_claim_minutes)
        };

        tracing::info!(
            run_id = %run_id,
            job = %job.name,
            faucet = %job.faucet,
            amount = ?outcome.amount,
            next_claim_minutes = predicted_minutes,
            "Job succeeded"
        );

        self.record_outcome(job, run_id, &outcome).await;

        {
            let mut state = self.state.write().await;
            state.record_result(true);
            if !job.kind.is_one_shot() {
                let mut next = job.clone();
                next.retry_count = 0;
                next.next_run = now + ChronoDuration::seconds((predicted_minutes * 60.0) as i64);
                state.queue.insert(next);
            }
        }
    }

    async fn handle_failure(
        &self,
        job: &Job,
        run_id: Uuid,
        outcome: ClaimOutcome,
        proxy_key: Option<&str>,
    ) {
        let now = Utc::now();
        let error_type = classify(
            outcome.error_type,
            &outcome.status,
            &self.settings.blocking_keywords,
        );
        metrics::record_job_failed(&job.faucet, error_type.as_str());
        tracing::warn!(
            run_id = %run_id,
            job = %job.name,
            faucet = %job.faucet,
            error_type = %error_type,
            status = %outcome.status,
            "Job failed"
        );

        if let Some(key) = proxy_key {
            if matches!(error_type, ErrorType::ProxyIssue | ErrorType::RateLimit) {
                let detected = error_type == ErrorType::RateLimit;
                self.proxy.record_failure(key, detected, None).await;
                metrics::record_proxy_cooldown();
            }
        }

        if self
            .breaker
            .write()
            .await
            .record_failure(&job.faucet, error_type, now)
        {
            metrics::record_breaker_trip(&job.faucet);
        }

        // Security challenges consume a separate retry budget per account.
        if self.is_security_challenge(&outcome.status) {
            let username = self
                .profiles
                .get(&job.profile_id)
                .map(|p| p.username.clone())
                .unwrap_or_default();
            let allowed = self
                .security
                .write()
                .await
                .record_challenge(&job.faucet, &username, now);
            if !allowed {
                tracing::warn!(
                    job = %job.name,
                    faucet = %job.faucet,
                    "Security retries exhausted, dropping job"
                );
                metrics::record_job_dropped(&job.faucet, "security_retries_exhausted");
                self.record_outcome(job, run_id, &outcome).await;
                self.state.write().await.record_result(false);
                return;
            }
        }

        let delay = self.settings.retry.delay(error_type, job.retry_count);
        let withdrawal_exhausted = job.kind == JobKind::Withdraw
            && job.retry_count + 1 >= self.settings.withdrawal_max_retries;

        let mut state = self.state.write().await;
        state.record_result(false);
        match delay {
            Some(delay) if !withdrawal_exhausted => {
                let mut next = job.clone();
                next.retry_count += 1;
                next.next_run = now
                    + ChronoDuration::seconds(delay.as_secs() as i64);
                tracing::info!(
                    job = %next.name,
                    retry = next.retry_count,
                    next_run = %next.next_run,
                    "Job rescheduled"
                );
                state.queue.insert(next);
                drop(state);
            }
            _ => {
                let reason = if withdrawal_exhausted {
                    "withdrawal_retries_exhausted"
                } else {
                    "permanent"
                };
                metrics::record_job_dropped(&job.faucet, reason);
                tracing::warn!(job = %job.name, faucet = %job.faucet, reason, "Job dropped");
                drop(state);
                // Dropped jobs are recorded exactly once.
                self.record_outcome(job, run_id, &outcome).await;
            }
        }
    }

    fn is_security_challenge(&self, status: &str) -> bool {
        let status = status.to_lowercase();
        self.settings
            .security_keywords
            .iter()
            .any(|k| status.contains(k.as_str()))
    }

    async fn record_outcome(&self, job: &Job, run_id: Uuid, outcome: &ClaimOutcome) {
        let record = JobOutcomeRecord {
            run_id,
            faucet: job.faucet.clone(),
            profile_id: job.profile_id.clone(),
            kind: job.kind,
            success: outcome.success,
            status: outcome.status.clone(),
            error_type: outcome.error_type,
            amount: outcome.amount,
            currency: outcome.currency.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.analytics.record_outcome(&record).await {
            tracing::warn!(error = %e, "Analytics record failed");
        }
    }
}

/// Admission decision for one ready job
enum Admission {
    Launch,
    Skip,
    Defer(DateTime<Utc>),
    Drop(&'static str),
}

/// How one execution attempt ended
enum Execution {
    /// The executor returned an outcome, success or not
    Completed {
        outcome: ClaimOutcome,
        proxy_key: Option<String>,
    },
    /// The wrapper itself failed (timeout, acquisition, executor panic)
    Wrapped {
        status: String,
        proxy_key: Option<String>,
    },
}

/// Start of the next UTC day
fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
        .unwrap_or_else(|| now + ChronoDuration::hours(24))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faucet::{FaucetEconomics, FaucetExecutor, FixedBudget, NoopBrowser};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Executor returning scripted outcomes in order, then repeating the last
    struct ScriptedExecutor {
        faucet: String,
        outcomes: StdMutex<Vec<ClaimOutcome>>,
    }

    impl ScriptedExecutor {
        fn new(faucet: &str, outcomes: Vec<ClaimOutcome>) -> Arc<Self> {
            Arc::new(Self {
                faucet: faucet.to_string(),
                outcomes: StdMutex::new(outcomes),
            })
        }
    }

    #[async_trait]
    impl FaucetExecutor for ScriptedExecutor {
        fn faucet(&self) -> &str {
            &self.faucet
        }

        async fn run(
            &self,
            _page: &PageHandle,
            _profile: &AccountProfile,
            _kind: JobKind,
        ) -> anyhow::Result<ClaimOutcome> {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                Ok(outcomes.remove(0))
            } else {
                Ok(outcomes[0].clone())
            }
        }
    }

    /// Analytics sink capturing records in memory
    #[derive(Default)]
    struct CapturingSink {
        records: StdMutex<Vec<JobOutcomeRecord>>,
    }

    #[async_trait]
    impl AnalyticsSink for CapturingSink {
        async fn record_outcome(&self, record: &JobOutcomeRecord) -> anyhow::Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct Harness {
        scheduler: Arc<JobScheduler>,
        sink: Arc<CapturingSink>,
        budget: Arc<FixedBudget>,
        _dir: tempfile::TempDir,
    }

    fn build(outcomes: Vec<ClaimOutcome>) -> Harness {
        build_with(outcomes, |_| {})
    }

    fn build_with(
        outcomes: Vec<ClaimOutcome>,
        tweak: impl FnOnce(&mut Config),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.session.session_path = dir.path().join("session.json");
        config.session.heartbeat_path = dir.path().join("heartbeat.json");
        config.session.security_path = dir.path().join("security.json");
        config.proxy.list_path = None;
        config.proxy.health_path = dir.path().join("proxy_health.json");
        config.scheduler.mode.maintenance_flag = dir.path().join("MAINTENANCE");
        config.profiles.push(AccountProfile {
            id: "p1".to_string(),
            username: "alice".to_string(),
            faucets: vec!["firefaucet".to_string()],
            max_concurrent_jobs: 2,
            proxy_strategy: Default::default(),
            wallet_address: Some("TWalletAddr".to_string()),
        });
        tweak(&mut config);

        let mut registry = ExecutorRegistry::new();
        registry.register(ScriptedExecutor::new("firefaucet", outcomes));

        let sink = Arc::new(CapturingSink::default());
        let budget = Arc::new(FixedBudget::new(config.budget.daily_budget_usd));
        let proxy = Arc::new(ProxyManager::new(config.proxy.clone()));
        let scheduler = JobScheduler::new(
            &config,
            registry,
            Arc::new(NoopBrowser::new()),
            Arc::clone(&budget) as Arc<dyn BudgetProvider>,
            Arc::clone(&sink) as Arc<dyn AnalyticsSink>,
            proxy,
        );

        Harness {
            scheduler,
            sink,
            budget,
            _dir: dir,
        }
    }

    fn claim_job() -> Job {
        Job::new(5, "claim:firefaucet", "p1", "firefaucet", JobKind::Claim)
    }

    #[tokio::test]
    async fn test_add_job_rejects_unknown_profile() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        let job = Job::new(5, "claim", "ghost", "firefaucet", JobKind::Claim);
        assert!(matches!(
            h.scheduler.add_job(job).await,
            Err(SchedulerError::UnknownProfile { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_job_rejects_duplicates() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.scheduler.add_job(claim_job()).await.unwrap();
        assert!(matches!(
            h.scheduler.add_job(claim_job()).await,
            Err(SchedulerError::DuplicateJob { .. })
        ));
        assert_eq!(h.scheduler.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_dynamic_priority_overrides_static() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.session.session_path = dir.path().join("session.json");
        config.proxy.list_path = None;
        config.profiles.push(AccountProfile {
            id: "p1".to_string(),
            username: "alice".to_string(),
            faucets: vec!["firefaucet".to_string()],
            max_concurrent_jobs: 1,
            proxy_strategy: Default::default(),
            wallet_address: None,
        });

        let scheduler = JobScheduler::new(
            &config,
            ExecutorRegistry::new(),
            Arc::new(NoopBrowser::new()),
            Arc::new(FixedBudget::new(5.0)),
            Arc::new(CapturingSink::default()),
            Arc::new(ProxyManager::new(config.proxy.clone())),
        )
        .with_dynamic_priority(Box::new(|job| {
            (job.faucet == "firefaucet").then_some(1)
        }));

        scheduler.add_job(claim_job()).await.unwrap();
        let state = scheduler.state.read().await;
        assert_eq!(state.queue.iter().next().unwrap().priority, 1);
    }

    #[tokio::test]
    async fn test_success_reschedules_recurring_claim() {
        let h = build(vec![ClaimOutcome::ok("claimed", 30.0)]);
        let before = Utc::now();
        Arc::clone(&h.scheduler).run_job_wrapper(claim_job()).await;

        let state = h.scheduler.state.read().await;
        assert_eq!(state.queue.len(), 1);
        let next = state.queue.iter().next().unwrap();
        assert_eq!(next.retry_count, 0);
        assert!(next.next_run >= before + ChronoDuration::minutes(29));
        assert_eq!(h.sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_shot_not_reenqueued() {
        let h = build(vec![ClaimOutcome::ok("withdrawn", 60.0)]);
        let job = Job::new(5, "withdraw:firefaucet", "p1", "firefaucet", JobKind::Withdraw);
        Arc::clone(&h.scheduler).run_job_wrapper(job).await;

        assert_eq!(h.scheduler.queue_depth().await, 0);
        assert_eq!(h.scheduler.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_reschedules_with_delay() {
        let h = build(vec![ClaimOutcome::failed_with(
            "rate limited",
            ErrorType::RateLimit,
        )]);
        let before = Utc::now();
        Arc::clone(&h.scheduler).run_job_wrapper(claim_job()).await;

        let state = h.scheduler.state.read().await;
        assert_eq!(state.queue.len(), 1);
        let next = state.queue.iter().next().unwrap();
        assert_eq!(next.retry_count, 1);
        // Rate limit base delay is 600s.
        assert!(next.next_run >= before + ChronoDuration::seconds(590));
    }

    #[tokio::test]
    async fn test_permanent_failure_drops_and_records_once() {
        let h = build(vec![ClaimOutcome::failed_with(
            "account banned",
            ErrorType::Permanent,
        )]);
        Arc::clone(&h.scheduler).run_job_wrapper(claim_job()).await;

        assert_eq!(h.scheduler.queue_depth().await, 0);
        assert_eq!(h.sink.records.lock().unwrap().len(), 1);

        // Permanent also trips the breaker immediately.
        let mut breaker = h.scheduler.breaker.write().await;
        assert!(breaker.is_open("firefaucet", Utc::now()));
    }

    #[tokio::test]
    async fn test_withdrawal_retry_budget_exhausts() {
        let h = build(vec![ClaimOutcome::failed_with(
            "timeout",
            ErrorType::Transient,
        )]);
        let mut job = Job::new(5, "withdraw:firefaucet", "p1", "firefaucet", JobKind::Withdraw);
        job.retry_count = 2; // withdrawal_max_retries defaults to 3
        Arc::clone(&h.scheduler).run_job_wrapper(job).await;

        assert_eq!(h.scheduler.queue_depth().await, 0);
        assert_eq!(h.sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_security_challenge_exhaustion_drops_job() {
        let h = build(vec![ClaimOutcome::failed(
            "Security check required, verify your identity",
        )]);
        for _ in 0..3 {
            Arc::clone(&h.scheduler).run_job_wrapper(claim_job()).await;
            // Clear the reschedule so the next wrapper run starts fresh.
            h.scheduler.purge_jobs(|_| true).await;
        }
        let exhausted = h
            .scheduler
            .security
            .read()
            .await
            .is_exhausted("firefaucet", "alice", Utc::now());
        assert!(exhausted);
    }

    #[tokio::test]
    async fn test_admission_skips_tripped_breaker() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        let now = Utc::now();
        h.scheduler
            .breaker
            .write()
            .await
            .record_failure("firefaucet", ErrorType::Permanent, now);

        let decision = h.scheduler.admission_check(&claim_job(), now, false).await;
        assert!(matches!(decision, Admission::Skip));
    }

    #[tokio::test]
    async fn test_admission_defers_unprofitable_claim() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.budget
            .set_economics(
                "firefaucet",
                FaucetEconomics {
                    avg_earnings_usd: 0.01,
                    success_rate: 0.9,
                    estimated_cost_usd: 0.10,
                    attempts: 50,
                },
            )
            .await;

        let now = Utc::now();
        match h.scheduler.admission_check(&claim_job(), now, false).await {
            Admission::Defer(until) => {
                assert!(until >= now + ChronoDuration::seconds(UNPROFITABLE_DEFER_SECS - 5));
            }
            _ => panic!("expected deferral"),
        }

        // With the budget exhausted, the deferral stretches to the next day.
        match h.scheduler.admission_check(&claim_job(), now, true).await {
            Admission::Defer(until) => assert_eq!(until, next_utc_midnight(now)),
            _ => panic!("expected deferral"),
        }
    }

    #[tokio::test]
    async fn test_admission_suspends_low_success_rate() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.budget
            .set_economics(
                "firefaucet",
                FaucetEconomics {
                    avg_earnings_usd: 0.5,
                    success_rate: 0.05,
                    estimated_cost_usd: 0.01,
                    attempts: 50,
                },
            )
            .await;

        let decision = h
            .scheduler
            .admission_check(&claim_job(), Utc::now(), false)
            .await;
        assert!(matches!(decision, Admission::Defer(_)));
    }

    #[tokio::test]
    async fn test_withdrawals_skip_economics_gates() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.budget
            .set_economics(
                "firefaucet",
                FaucetEconomics {
                    avg_earnings_usd: 0.01,
                    success_rate: 0.05,
                    estimated_cost_usd: 0.10,
                    attempts: 50,
                },
            )
            .await;

        let job = Job::new(5, "withdraw:firefaucet", "p1", "firefaucet", JobKind::Withdraw);
        let decision = h.scheduler.admission_check(&job, Utc::now(), false).await;
        assert!(matches!(decision, Admission::Launch));
    }

    #[tokio::test]
    async fn test_domain_gap_stretched_by_degraded_mode() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        let now = Utc::now();
        {
            let mut state = h.scheduler.state.write().await;
            state
                .domain_last_access
                .insert("firefaucet".to_string(), now - ChronoDuration::seconds(90));
        }

        // 90s since the last launch clears the 60s gap at the normal multiplier.
        let decision = h.scheduler.admission_check(&claim_job(), now, false).await;
        assert!(matches!(decision, Admission::Launch));

        // Slow mode triples the gap to 180s; the same job now waits.
        h.scheduler.state.write().await.mode = Some(OperationMode::SlowMode);
        let decision = h.scheduler.admission_check(&claim_job(), now, false).await;
        assert!(matches!(decision, Admission::Skip));
    }

    #[tokio::test]
    async fn test_low_budget_mode_purges_expensive_claims() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.scheduler.add_job(claim_job()).await.unwrap();
        let withdraw =
            Job::new(10, "withdraw:firefaucet", "p1", "firefaucet", JobKind::Withdraw);
        h.scheduler.add_job(withdraw).await.unwrap();

        h.budget
            .set_economics(
                "firefaucet",
                FaucetEconomics {
                    avg_earnings_usd: 0.01,
                    success_rate: 0.9,
                    estimated_cost_usd: 0.10,
                    attempts: 50,
                },
            )
            .await;
        // Drain the daily budget below the low-budget threshold.
        h.budget.record_spend(5.0).await;

        h.scheduler.refresh_mode_if_due(Utc::now()).await;
        assert_eq!(h.scheduler.current_mode().await, OperationMode::LowBudget);

        // The expensive claim is purged; the withdrawal stays queued.
        let state = h.scheduler.state.read().await;
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue.iter().next().unwrap().kind, JobKind::Withdraw);
    }

    #[tokio::test]
    async fn test_withdrawal_generation_once() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        let now = Utc::now();
        h.scheduler.generate_withdrawal_jobs_once(now).await;
        // One withdraw per faucet plus the balance sweep.
        assert_eq!(h.scheduler.queue_depth().await, 2);

        h.scheduler.generate_withdrawal_jobs_once(now).await;
        assert_eq!(h.scheduler.queue_depth().await, 2);
    }

    #[tokio::test]
    async fn test_session_round_trip_through_scheduler() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.scheduler.add_job(claim_job()).await.unwrap();
        h.scheduler.persist_session().await.unwrap();

        h.scheduler.purge_jobs(|_| true).await;
        assert_eq!(h.scheduler.queue_depth().await, 0);

        let restored = h.scheduler.restore_session().await.unwrap();
        assert_eq!(restored, 1);
        assert_eq!(h.scheduler.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn test_purge_clears_domain_bookkeeping() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.scheduler.add_job(claim_job()).await.unwrap();
        {
            let mut state = h.scheduler.state.write().await;
            state
                .domain_last_access
                .insert("firefaucet".to_string(), Utc::now());
        }

        let purged = h.scheduler.purge_jobs(|j| j.faucet == "firefaucet").await;
        assert_eq!(purged, 1);
        let state = h.scheduler.state.read().await;
        assert!(!state.domain_last_access.contains_key("firefaucet"));
    }

    #[tokio::test]
    async fn test_maintenance_flag_pauses_admission() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        let flag = h.scheduler.detector.config().maintenance_flag.clone();
        std::fs::write(&flag, "").unwrap();

        h.scheduler.refresh_mode_if_due(Utc::now()).await;
        assert_eq!(h.scheduler.current_mode().await, OperationMode::Maintenance);
        assert!(h.scheduler.current_mode().await.pauses_admission());
    }

    #[tokio::test]
    async fn test_heartbeat_written_by_maintenance() {
        let h = build(vec![ClaimOutcome::ok("ok", 60.0)]);
        h.scheduler.add_job(claim_job()).await.unwrap();
        h.scheduler.run_maintenance_if_due(Utc::now()).await;

        let heartbeat = Heartbeat::read(&h.scheduler.heartbeat_path).unwrap();
        assert_eq!(heartbeat.queue_depth, 1);
        assert_eq!(heartbeat.running, 0);
    }

    #[tokio::test]
    async fn test_launch_ready_jobs_runs_job() {
        let h = build(vec![ClaimOutcome::ok("claimed", 45.0)]);
        h.scheduler.add_job(claim_job()).await.unwrap();
        h.scheduler.refresh_mode_if_due(Utc::now()).await;
        Arc::clone(&h.scheduler).launch_ready_jobs(Utc::now()).await;

        // Wait for the spawned wrapper to finish.
        for _ in 0..50 {
            if h.scheduler.running_count().await == 0
                && !h.sink.records.lock().unwrap().is_empty()
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.sink.records.lock().unwrap().len(), 1);
        // The recurring claim went back into the queue.
        assert_eq!(h.scheduler.queue_depth().await, 1);
    }

    #[test]
    fn test_next_utc_midnight() {
        let now = Utc::now();
        let midnight = next_utc_midnight(now);
        assert!(midnight > now);
        assert_eq!(midnight.time(), chrono::NaiveTime::MIN);
    }
}
