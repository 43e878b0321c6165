//! Proxy pool management
//!
//! The manager owns the master proxy list and a derived eligible subset.
//! Failures never remove a proxy from the master list; they only set
//! cooldowns or a dead flag that excludes the proxy from the eligible subset
//! until it recovers. Health state is persisted with a version and timestamp
//! so stale data can never silently reactivate bad proxies after a restart.

pub mod record;
pub mod rotation;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

pub use record::{parse_proxy_list, ProxyEndpoint, ProxyRecord};
pub use rotation::{RotationState, RotationStrategy};

// ============================================================================
// Errors
// ============================================================================

/// Proxy subsystem errors
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A proxy-list line could not be parsed
    #[error("Invalid proxy endpoint '{line}': {reason}")]
    InvalidEndpoint { line: String, reason: String },

    /// Health file was written by a different format version
    #[error("Proxy health version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// Health file is older than the staleness window
    #[error("Proxy health data is stale ({age_hours}h old)")]
    StaleHealth { age_hours: i64 },

    /// Proxy list fetch failed
    #[error("Proxy API fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// I/O error
    #[error("Proxy I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Proxy serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Line-oriented proxy list file
    pub list_path: Option<PathBuf>,

    /// Provider API returning a proxy list body; fetched when the eligible
    /// pool drains
    pub api_url: Option<String>,

    /// Persisted health state file
    pub health_path: PathBuf,

    /// Cooldown after a detection event (403/blocked), seconds
    pub detection_cooldown_secs: u64,

    /// Cooldown after repeated plain failures, seconds
    pub failure_cooldown_secs: u64,

    /// Plain failures before the short cooldown and dead flag apply
    pub failure_threshold: u32,

    /// Rolling-average latency above this marks a proxy ineligible, ms
    pub dead_latency_ms: f64,

    /// Latency ring size per proxy
    pub latency_window: usize,

    /// Samples required before the latency average is trusted
    pub min_latency_samples: usize,

    /// Reject persisted health older than this many hours
    pub health_max_age_hours: i64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            list_path: Some(PathBuf::from("data/proxies.txt")),
            api_url: None,
            health_path: PathBuf::from("data/proxy_health.json"),
            detection_cooldown_secs: 3_600,
            failure_cooldown_secs: 300,
            failure_threshold: 3,
            dead_latency_ms: 8_000.0,
            latency_window: 10,
            min_latency_samples: 3,
            health_max_age_hours: 7 * 24,
        }
    }
}

/// On-disk health snapshot format version
const HEALTH_VERSION: u32 = 1;

/// Persisted proxy health state
#[derive(Debug, Serialize, Deserialize)]
struct HealthSnapshot {
    version: u32,
    timestamp: DateTime<Utc>,
    proxy_latency: HashMap<String, Vec<u64>>,
    proxy_failures: HashMap<String, u32>,
    dead_proxies: Vec<String>,
    proxy_cooldowns: HashMap<String, DateTime<Utc>>,
}

// ============================================================================
// Proxy Manager
// ============================================================================

#[derive(Debug, Default)]
struct PoolState {
    /// Master list, never shrunk by failures
    all: HashMap<String, ProxyEndpoint>,
    /// Insertion order of master-list keys, for deterministic iteration
    order: Vec<String>,
    records: HashMap<String, ProxyRecord>,
    /// Derived subset of keys currently eligible for assignment
    eligible: Vec<String>,
    rotation: RotationState,
}

/// Owns the proxy pool, health tracking, and rotation/assignment
pub struct ProxyManager {
    config: ProxyConfig,
    state: RwLock<PoolState>,
    // Guards the read-pool -> fetch-if-empty -> replenish critical section,
    // which spans multiple await points.
    assignment_guard: Mutex<()>,
    http: reqwest::Client,
}

impl ProxyManager {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PoolState::default()),
            assignment_guard: Mutex::new(()),
            http: reqwest::Client::new(),
        }
    }

    /// Load the master list from the configured list file, then restore any
    /// valid persisted health state
    pub async fn load(&self) -> Result<usize, ProxyError> {
        let mut loaded = 0;
        if let Some(path) = self.config.list_path.clone() {
            if path.exists() {
                let body = fs::read_to_string(&path)?;
                loaded = self.add_endpoints(parse_proxy_list(&body)).await;
            } else {
                tracing::warn!(path = %path.display(), "Proxy list file not found");
            }
        }
        match self.load_health().await {
            Ok(true) => tracing::info!("Restored persisted proxy health state"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring persisted proxy health"),
        }
        self.remove_dead_proxies().await;
        Ok(loaded)
    }

    /// Merge endpoints into the master list; returns how many were new
    pub async fn add_endpoints(&self, endpoints: Vec<ProxyEndpoint>) -> usize {
        let mut state = self.state.write().await;
        let mut added = 0;
        for endpoint in endpoints {
            let key = endpoint.key();
            if state.all.insert(key.clone(), endpoint).is_none() {
                state.order.push(key.clone());
                state.records.entry(key).or_default();
                added += 1;
            }
        }
        added
    }

    /// Fetch the provider API and merge the returned list
    pub async fn refresh_from_api(&self) -> Result<usize, ProxyError> {
        let Some(url) = self.config.api_url.clone() else {
            return Ok(0);
        };
        let body = self.http.get(&url).send().await?.error_for_status()?.text().await?;
        let added = self.add_endpoints(parse_proxy_list(&body)).await;
        tracing::info!(added, "Refreshed proxy pool from API");
        Ok(added)
    }

    /// Record a failed request through a proxy
    ///
    /// A detection event (403 or a recognized block) sets the long cooldown
    /// scoped to this key only; repeated plain failures reaching the
    /// threshold set the short cooldown and mark the proxy dead. The master
    /// list is never shrunk here.
    pub async fn record_failure(&self, key: &str, detected: bool, status_code: Option<u16>) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let config = &self.config;
        let record = state.records.entry(key.to_string()).or_default();
        record.failures += 1;

        let detected = detected || status_code == Some(403);
        if detected {
            record.cooldown_until =
                Some(now + Duration::seconds(config.detection_cooldown_secs as i64));
            tracing::warn!(
                proxy = %key,
                status = ?status_code,
                "Proxy detected/blocked, long cooldown applied"
            );
        } else if record.failures >= config.failure_threshold {
            record.dead = true;
            record.cooldown_until =
                Some(now + Duration::seconds(config.failure_cooldown_secs as i64));
            tracing::warn!(
                proxy = %key,
                failures = record.failures,
                "Proxy marked dead after repeated failures"
            );
        }
        drop(state);
        self.recompute_eligible().await;
    }

    /// Record a successful request and its latency
    pub async fn record_success(&self, key: &str, latency_ms: u64) {
        let window = self.config.latency_window;
        let mut state = self.state.write().await;
        let record = state.records.entry(key.to_string()).or_default();
        record.failures = 0;
        record.record_latency(latency_ms, window);
    }

    /// Recompute the eligible subset, reviving proxies whose cooldown expired
    ///
    /// Returns the eligible count.
    pub async fn remove_dead_proxies(&self) -> usize {
        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            for record in state.records.values_mut() {
                if let Some(until) = record.cooldown_until {
                    if until <= now {
                        record.cooldown_until = None;
                        record.dead = false;
                        record.failures = 0;
                    }
                }
            }
        }
        self.recompute_eligible().await
    }

    async fn recompute_eligible(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let config = &self.config;
        let eligible: Vec<String> = state
            .order
            .iter()
            .filter(|key| {
                let Some(record) = state.records.get(*key) else {
                    return true;
                };
                if record.dead || record.is_cooling(now) {
                    return false;
                }
                match record.avg_latency_ms(config.min_latency_samples) {
                    Some(avg) => avg < config.dead_latency_ms,
                    None => true,
                }
            })
            .cloned()
            .collect();
        let count = eligible.len();
        state.eligible = eligible;
        count
    }

    pub async fn eligible_count(&self) -> usize {
        self.state.read().await.eligible.len()
    }

    pub async fn total_count(&self) -> usize {
        self.state.read().await.all.len()
    }

    /// Endpoint for a normalized key, if present in the master list
    pub async fn endpoint(&self, key: &str) -> Option<ProxyEndpoint> {
        self.state.read().await.all.get(key).cloned()
    }

    /// Cooldown expiry for a key, if cooling
    pub async fn cooldown_until(&self, key: &str) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .await
            .records
            .get(key)
            .and_then(|r| r.cooldown_until)
    }

    /// Select the next proxy for a profile per its rotation strategy
    ///
    /// Spans read-pool -> fetch-if-empty -> replenish, so the whole section
    /// is serialized behind one lock.
    pub async fn next_for_profile(
        &self,
        profile_id: &str,
        strategy: RotationStrategy,
    ) -> Option<ProxyEndpoint> {
        let _guard = self.assignment_guard.lock().await;

        if self.eligible_count().await == 0 && self.config.api_url.is_some() {
            if let Err(e) = self.refresh_from_api().await {
                tracing::warn!(error = %e, "Proxy pool replenish failed");
            }
            self.remove_dead_proxies().await;
        }

        let mut state = self.state.write().await;
        let eligible = state.eligible.clone();
        let key = state.rotation.next(profile_id, strategy, &eligible)?;
        state.all.get(&key).cloned()
    }

    /// Statically assign proxies to profiles round-robin for sticky sessions
    pub async fn assign_proxies(&self, profile_ids: &[String]) -> HashMap<String, String> {
        let mut state = self.state.write().await;
        let pool = if state.eligible.is_empty() {
            state.order.clone()
        } else {
            state.eligible.clone()
        };
        state.rotation.assign(profile_ids, &pool)
    }

    // ------------------------------------------------------------------
    // Health persistence
    // ------------------------------------------------------------------

    /// Persist the health state atomically (temp file + rename)
    pub async fn save_health(&self) -> Result<(), ProxyError> {
        let snapshot = {
            let state = self.state.read().await;
            HealthSnapshot {
                version: HEALTH_VERSION,
                timestamp: Utc::now(),
                proxy_latency: state
                    .records
                    .iter()
                    .map(|(k, r)| (k.clone(), r.latency_ms.iter().copied().collect()))
                    .collect(),
                proxy_failures: state
                    .records
                    .iter()
                    .map(|(k, r)| (k.clone(), r.failures))
                    .collect(),
                dead_proxies: state
                    .records
                    .iter()
                    .filter(|(_, r)| r.dead)
                    .map(|(k, _)| k.clone())
                    .collect(),
                proxy_cooldowns: state
                    .records
                    .iter()
                    .filter_map(|(k, r)| r.cooldown_until.map(|t| (k.clone(), t)))
                    .collect(),
            }
        };

        let path = &self.config.health_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("json.tmp");
        let file = File::create(&temp)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
        fs::rename(&temp, path)?;
        tracing::debug!(path = %path.display(), "Proxy health saved");
        Ok(())
    }

    /// Restore persisted health state
    ///
    /// Returns `Ok(false)` when no file exists. Errors on version mismatch or
    /// staleness so old health data never reactivates bad proxies.
    pub async fn load_health(&self) -> Result<bool, ProxyError> {
        let path = &self.config.health_path;
        if !path.exists() {
            return Ok(false);
        }
        let file = File::open(path)?;
        let snapshot: HealthSnapshot = serde_json::from_reader(BufReader::new(file))?;

        if snapshot.version != HEALTH_VERSION {
            return Err(ProxyError::VersionMismatch {
                found: snapshot.version,
                expected: HEALTH_VERSION,
            });
        }
        let age = Utc::now() - snapshot.timestamp;
        if age > Duration::hours(self.config.health_max_age_hours) {
            return Err(ProxyError::StaleHealth {
                age_hours: age.num_hours(),
            });
        }

        let window = self.config.latency_window;
        let mut state = self.state.write().await;
        for (key, samples) in snapshot.proxy_latency {
            let record = state.records.entry(key).or_default();
            for sample in samples {
                record.record_latency(sample, window);
            }
        }
        for (key, failures) in snapshot.proxy_failures {
            state.records.entry(key).or_default().failures = failures;
        }
        for key in snapshot.dead_proxies {
            state.records.entry(key).or_default().dead = true;
        }
        for (key, until) in snapshot.proxy_cooldowns {
            state.records.entry(key).or_default().cooldown_until = Some(until);
        }
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
