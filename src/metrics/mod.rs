//! Prometheus metrics for the spigot scheduler
//!
//! This module provides metrics tracking for:
//! - Scheduler: jobs launched/completed/failed, queue depth, running jobs,
//!   operation mode, circuit-breaker trips
//! - Proxy pool: eligible proxies, cooldowns applied
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    jobs_launched: CounterVec,
    jobs_completed: CounterVec,
    jobs_failed: CounterVec,
    jobs_dropped: CounterVec,
    breaker_trips: CounterVec,
    queue_depth: Gauge,
    running_jobs: Gauge,
    operation_mode: Gauge,
}

/// Container for all proxy metrics
struct ProxyMetrics {
    eligible_proxies: Gauge,
    total_proxies: Gauge,
    cooldowns_applied: Counter,
}

/// Global storage for scheduler metrics
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Global storage for proxy metrics
static PROXY_METRICS: OnceLock<ProxyMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let scheduler = SchedulerMetrics {
        jobs_launched: register_counter_vec!(
            "spigot_jobs_launched_total",
            "Total jobs launched by faucet and kind",
            &["faucet", "kind"]
        )?,
        jobs_completed: register_counter_vec!(
            "spigot_jobs_completed_total",
            "Total jobs completed successfully by faucet",
            &["faucet"]
        )?,
        jobs_failed: register_counter_vec!(
            "spigot_jobs_failed_total",
            "Total job failures by faucet and error type",
            &["faucet", "error_type"]
        )?,
        jobs_dropped: register_counter_vec!(
            "spigot_jobs_dropped_total",
            "Total jobs dropped without reschedule by faucet and reason",
            &["faucet", "reason"]
        )?,
        breaker_trips: register_counter_vec!(
            "spigot_breaker_trips_total",
            "Total circuit-breaker trips by faucet",
            &["faucet"]
        )?,
        queue_depth: register_gauge!("spigot_queue_depth", "Jobs currently queued")?,
        running_jobs: register_gauge!("spigot_running_jobs", "Jobs currently running")?,
        operation_mode: register_gauge!(
            "spigot_operation_mode",
            "Current operation mode severity (0=normal .. 4=maintenance)"
        )?,
    };

    let proxy = ProxyMetrics {
        eligible_proxies: register_gauge!(
            "spigot_proxy_eligible",
            "Proxies currently eligible for assignment"
        )?,
        total_proxies: register_gauge!("spigot_proxy_total", "Proxies in the master list")?,
        cooldowns_applied: register_counter!(
            "spigot_proxy_cooldowns_total",
            "Total proxy cooldowns applied"
        )?,
    };

    SCHEDULER_METRICS
        .set(scheduler)
        .map_err(|_| "Scheduler metrics already initialized")?;
    PROXY_METRICS
        .set(proxy)
        .map_err(|_| "Proxy metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some() && PROXY_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a job launch
pub fn record_job_launched(faucet: &str, kind: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.jobs_launched.with_label_values(&[faucet, kind]).inc();
    }
}

/// Record a successful job completion
pub fn record_job_completed(faucet: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.jobs_completed.with_label_values(&[faucet]).inc();
    }
}

/// Record a job failure by error type
pub fn record_job_failed(faucet: &str, error_type: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.jobs_failed.with_label_values(&[faucet, error_type]).inc();
    }
}

/// Record a job dropped without reschedule
pub fn record_job_dropped(faucet: &str, reason: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.jobs_dropped.with_label_values(&[faucet, reason]).inc();
    }
}

/// Record a circuit-breaker trip
pub fn record_breaker_trip(faucet: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.breaker_trips.with_label_values(&[faucet]).inc();
    }
}

/// Update queue/running gauges
pub fn update_scheduler_gauges(queue_depth: usize, running: usize) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.queue_depth.set(queue_depth as f64);
        m.running_jobs.set(running as f64);
    }
}

/// Update the operation-mode gauge (severity value)
pub fn update_operation_mode(severity: u8) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.operation_mode.set(severity as f64);
    }
}

/// Update proxy pool gauges
pub fn update_proxy_gauges(eligible: usize, total: usize) {
    if let Some(m) = PROXY_METRICS.get() {
        m.eligible_proxies.set(eligible as f64);
        m.total_proxies.set(total as f64);
    }
}

/// Record a proxy cooldown
pub fn record_proxy_cooldown() {
    if let Some(m) = PROXY_METRICS.get() {
        m.cooldowns_applied.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
