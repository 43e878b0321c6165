//! End-to-end scheduler tests driving the real loop through the public API
//!
//! These build a scheduler over temp-dir storage with a counting executor,
//! run `scheduler_loop` as a task, and observe effects from the outside.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use spigot::config::Config;
use spigot::faucet::{
    AccountProfile, ClaimOutcome, ExecutorRegistry, FaucetExecutor, FixedBudget, JsonlAnalytics,
    NoopBrowser, PageHandle,
};
use spigot::proxy::ProxyManager;
use spigot::scheduler::{Job, JobKind, JobScheduler, OperationMode};
use spigot::session::{Heartbeat, SessionSnapshot, SessionStore};

struct CountingExecutor {
    faucet: String,
    runs: AtomicU32,
}

impl CountingExecutor {
    fn new(faucet: &str) -> Arc<Self> {
        Arc::new(Self {
            faucet: faucet.to_string(),
            runs: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl FaucetExecutor for CountingExecutor {
    fn faucet(&self) -> &str {
        &self.faucet
    }

    async fn run(
        &self,
        _page: &PageHandle,
        _profile: &AccountProfile,
        _kind: JobKind,
    ) -> anyhow::Result<ClaimOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ClaimOutcome::ok("claimed", 60.0))
    }
}

/// Config with all storage redirected into a temp dir and intervals collapsed
/// so the loop reacts within a test's patience
fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.scheduler.tick_interval_secs = 0;
    config.scheduler.domain_gap_secs = 0;
    config.scheduler.maintenance_interval_secs = 0;
    config.scheduler.deep_check_interval_secs = 3600;
    config.scheduler.mode.check_interval_secs = 0;
    config.scheduler.mode.low_proxy_threshold = 0;
    config.scheduler.mode.maintenance_flag = dir.path().join("maintenance.flag");
    config.session.session_path = dir.path().join("session.json");
    config.session.heartbeat_path = dir.path().join("heartbeat.json");
    config.session.analytics_path = dir.path().join("outcomes.jsonl");
    config.session.security_path = dir.path().join("security.json");
    config.proxy.health_path = dir.path().join("proxy_health.json");
    config.profiles = vec![AccountProfile {
        id: "p1".to_string(),
        username: "alice".to_string(),
        faucets: vec!["firefaucet".to_string()],
        max_concurrent_jobs: 2,
        proxy_strategy: Default::default(),
        wallet_address: None,
    }];
    config
}

fn build_scheduler(
    config: &Config,
    executor: Arc<CountingExecutor>,
) -> Arc<JobScheduler> {
    let mut registry = ExecutorRegistry::new();
    registry.register(executor);
    JobScheduler::new(
        config,
        registry,
        Arc::new(NoopBrowser::new()),
        Arc::new(FixedBudget::new(config.budget.daily_budget_usd)),
        Arc::new(JsonlAnalytics::new(&config.session.analytics_path)),
        Arc::new(ProxyManager::new(config.proxy.clone())),
    )
}

/// Poll until `check` passes or the deadline hits
async fn wait_for<F>(check: F, what: &str)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_loop_executes_ready_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, Arc::clone(&executor));

    scheduler
        .add_job(Job::new(5, "claim", "p1", "firefaucet", JobKind::Claim))
        .await
        .unwrap();

    let handle = tokio::spawn(Arc::clone(&scheduler).scheduler_loop());
    wait_for(|| executor.runs.load(Ordering::SeqCst) >= 1, "job execution").await;
    scheduler.stop();
    handle.await.unwrap();

    // A successful recurring claim reschedules itself.
    assert_eq!(scheduler.queue_depth().await, 1);
}

#[tokio::test]
async fn test_heartbeat_written_during_maintenance() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, executor);

    let heartbeat_path = config.session.heartbeat_path.clone();
    let handle = tokio::spawn(Arc::clone(&scheduler).scheduler_loop());
    wait_for(|| heartbeat_path.exists(), "heartbeat file").await;
    scheduler.stop();
    handle.await.unwrap();

    let heartbeat = Heartbeat::read(&heartbeat_path).unwrap();
    assert_eq!(heartbeat.queue_depth, 0);
    assert_eq!(heartbeat.running, 0);
}

#[tokio::test]
async fn test_session_persisted_when_loop_stops() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, executor);

    // Far in the future so the loop never launches it.
    let job = Job::new(5, "claim", "p1", "firefaucet", JobKind::Claim)
        .at(Utc::now() + Duration::hours(6));
    scheduler.add_job(job).await.unwrap();

    let handle = tokio::spawn(Arc::clone(&scheduler).scheduler_loop());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    scheduler.stop();
    handle.await.unwrap();

    let store = SessionStore::new(config.session.session_path.clone(), 3);
    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.queue.len(), 1);
    assert_eq!(snapshot.queue[0].faucet, "firefaucet");
}

#[tokio::test]
async fn test_restore_drops_jobs_for_unknown_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let future = Utc::now() + Duration::hours(1);
    let snapshot = SessionSnapshot::new(
        vec![
            Job::new(5, "claim", "p1", "firefaucet", JobKind::Claim).at(future),
            Job::new(5, "claim", "ghost", "firefaucet", JobKind::Claim).at(future),
        ],
        Default::default(),
    );
    SessionStore::new(config.session.session_path.clone(), 3)
        .save(&snapshot)
        .unwrap();

    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, executor);
    let restored = scheduler.restore_session().await.unwrap();

    assert_eq!(restored, 1);
    assert_eq!(scheduler.queue_depth().await, 1);
}

#[tokio::test]
async fn test_maintenance_flag_switches_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::write(&config.scheduler.mode.maintenance_flag, "").unwrap();

    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, Arc::clone(&executor));
    scheduler
        .add_job(Job::new(5, "claim", "p1", "firefaucet", JobKind::Claim))
        .await
        .unwrap();

    let handle = tokio::spawn(Arc::clone(&scheduler).scheduler_loop());
    let mut reached = false;
    for _ in 0..200 {
        if scheduler.current_mode().await == OperationMode::Maintenance {
            reached = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    assert!(reached, "scheduler never entered maintenance mode");
    scheduler.stop();
    handle.await.unwrap();

    // Admission paused: the ready job never launched.
    assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.queue_depth().await, 1);
}

#[tokio::test]
async fn test_duplicate_job_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, executor);

    let job = Job::new(5, "claim", "p1", "firefaucet", JobKind::Claim);
    scheduler.add_job(job.clone()).await.unwrap();
    assert!(scheduler.add_job(job).await.is_err());
    assert_eq!(scheduler.queue_depth().await, 1);
}

#[tokio::test]
async fn test_purge_jobs_by_faucet() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let executor = CountingExecutor::new("firefaucet");
    let scheduler = build_scheduler(&config, executor);

    let future = Utc::now() + Duration::hours(1);
    scheduler
        .add_job(Job::new(5, "claim-a", "p1", "firefaucet", JobKind::Claim).at(future))
        .await
        .unwrap();
    scheduler
        .add_job(Job::new(5, "claim-b", "p1", "firefaucet", JobKind::Claim).at(future))
        .await
        .unwrap();

    let purged = scheduler.purge_jobs(|job| job.faucet == "firefaucet").await;
    assert_eq!(purged, 2);
    assert_eq!(scheduler.queue_depth().await, 0);
}
