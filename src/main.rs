use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spigot::config::{Config, LoggingConfig};
use spigot::faucet::{ExecutorRegistry, FixedBudget, JsonlAnalytics, NoopBrowser};
use spigot::proxy::ProxyManager;
use spigot::scheduler::breaker::SecurityRetryRecord;
use spigot::scheduler::{Job, JobKind, JobScheduler};
use spigot::session::{Heartbeat, SessionStore};
use spigot::utils::retry::{with_retry, RetryConfig};

#[derive(Parser)]
#[command(
    name = "spigot",
    version,
    about = "Faucet job scheduler with proxy rotation and failure resilience",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables apply otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon
    Run,

    /// Statically assign proxies to profiles and print the mapping
    AssignProxies,

    /// Purge queued jobs for a faucet from the persisted session
    Purge {
        /// Faucet identifier to purge
        faucet: String,

        /// Only purge this job kind (claim, withdraw, auto_withdrawal_check)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Clear persisted security-retry counters
    ResetSecurity {
        /// Limit the reset to one faucet
        #[arg(short, long)]
        faucet: Option<String>,

        /// Limit the reset to one username
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Print the scheduler heartbeat and session summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    setup_tracing(&config.logging, cli.log_format.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Run => {
            tracing::info!(profiles = config.profiles.len(), "Starting run command");
            run(config).await?;
        }

        Commands::AssignProxies => {
            tracing::info!("Starting assign-proxies command");
            assign_proxies(config).await?;
        }

        Commands::Purge { faucet, kind } => {
            tracing::info!(faucet = %faucet, kind = ?kind, "Starting purge command");
            purge(config, faucet, kind)?;
        }

        Commands::ResetSecurity { faucet, username } => {
            tracing::info!(
                faucet = ?faucet,
                username = ?username,
                "Starting reset-security command"
            );
            reset_security(config, faucet, username)?;
        }

        Commands::Status => {
            status(config)?;
        }
    }

    Ok(())
}

fn setup_tracing(
    logging: &LoggingConfig,
    format_override: Option<&str>,
    verbose: bool,
) -> Result<()> {
    let env_filter =
        tracing_subscriber::EnvFilter::new(filter_directive(&logging.level, verbose));

    match format_override.unwrap_or(&logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Build the env-filter directive; `--verbose` forces crate-level debug
fn filter_directive(level: &str, verbose: bool) -> String {
    if verbose {
        String::from("spigot=debug,info")
    } else {
        format!("spigot={level},warn")
    }
}

/// Run the scheduler daemon until interrupted
async fn run(config: Config) -> Result<()> {
    if let Err(e) = spigot::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without");
    }

    let proxy = Arc::new(ProxyManager::new(config.proxy.clone()));
    let loaded = proxy.load().await?;
    tracing::info!(proxies = loaded, "Proxy list loaded");
    if loaded == 0 && config.proxy.api_url.is_some() {
        let added = with_retry(&RetryConfig::new(2), || async {
            Ok(proxy.refresh_from_api().await?)
        })
        .await
        .context("Initial proxy fetch failed")?;
        tracing::info!(added, "Proxy pool fetched from API");
    }

    let budget = Arc::new(FixedBudget::new(config.budget.daily_budget_usd));
    let analytics = Arc::new(JsonlAnalytics::new(&config.session.analytics_path));

    // Site executors register here; the engine itself ships none.
    let registry = ExecutorRegistry::new();
    if registry.is_empty() {
        tracing::warn!("No faucet executors registered; jobs will fail as config errors");
    }

    let scheduler = JobScheduler::new(
        &config,
        registry,
        Arc::new(NoopBrowser::new()),
        budget,
        analytics,
        proxy,
    );

    let restored = scheduler.restore_session().await?;
    if restored == 0 {
        seed_claim_jobs(&scheduler, &config).await;
    }

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).scheduler_loop());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    scheduler.stop();
    loop_handle.await.context("Scheduler loop panicked")?;

    tracing::info!("spigot stopped cleanly");
    Ok(())
}

/// Enqueue the initial recurring claim job for every (profile, faucet) pair
async fn seed_claim_jobs(scheduler: &Arc<JobScheduler>, config: &Config) {
    let mut seeded = 0;
    for profile in &config.profiles {
        for faucet in &profile.faucets {
            let job = Job::new(
                5,
                format!("claim:{faucet}"),
                profile.id.clone(),
                faucet.clone(),
                JobKind::Claim,
            );
            match scheduler.add_job(job).await {
                Ok(()) => seeded += 1,
                Err(e) => tracing::warn!(error = %e, "Skipping seed job"),
            }
        }
    }
    tracing::info!(seeded, "Seeded claim jobs");
}

async fn assign_proxies(config: Config) -> Result<()> {
    let proxy = ProxyManager::new(config.proxy.clone());
    let loaded = proxy.load().await?;
    if loaded == 0 {
        anyhow::bail!("No proxies loaded; check the proxy list path");
    }

    let profile_ids: Vec<String> = config.profiles.iter().map(|p| p.id.clone()).collect();
    let assignments = proxy.assign_proxies(&profile_ids).await;

    println!("Proxy assignments ({} profiles, {loaded} proxies):", profile_ids.len());
    let mut ids: Vec<_> = assignments.keys().collect();
    ids.sort();
    for id in ids {
        println!("  {id} -> {}", assignments[id]);
    }
    Ok(())
}

fn purge(config: Config, faucet: String, kind: Option<String>) -> Result<()> {
    let store = SessionStore::new(
        config.session.session_path.clone(),
        config.session.max_backups,
    );
    let Some(mut snapshot) = store.load()? else {
        println!("No session file at {}", config.session.session_path.display());
        return Ok(());
    };

    let before = snapshot.queue.len();
    snapshot.queue.retain(|job| {
        let faucet_match = job.faucet == faucet;
        let kind_match = kind
            .as_deref()
            .map_or(true, |want| job.kind.as_str() == want);
        !(faucet_match && kind_match)
    });
    let purged = before - snapshot.queue.len();
    if !snapshot.queue.iter().any(|j| j.faucet == faucet) {
        snapshot.domain_last_access.remove(&faucet);
    }
    store.save(&snapshot)?;

    println!("Purged {purged} job(s) for '{faucet}' ({} remain queued)", snapshot.queue.len());
    Ok(())
}

fn reset_security(
    config: Config,
    faucet: Option<String>,
    username: Option<String>,
) -> Result<()> {
    let path = &config.session.security_path;
    if !path.exists() {
        println!("No security-retry state at {}", path.display());
        return Ok(());
    }

    let body = std::fs::read_to_string(path)?;
    let mut records: Vec<SecurityRetryRecord> = serde_json::from_str(&body)?;
    let before = records.len();
    records.retain(|r| {
        let faucet_match = faucet.as_deref().map_or(true, |want| r.faucet == want);
        let user_match = username.as_deref().map_or(true, |want| r.username == want);
        !(faucet_match && user_match)
    });
    let cleared = before - records.len();
    std::fs::write(path, serde_json::to_string_pretty(&records)?)?;

    println!("Cleared {cleared} security-retry counter(s)");
    Ok(())
}

fn status(config: Config) -> Result<()> {
    match Heartbeat::read(&config.session.heartbeat_path) {
        Ok(hb) => {
            println!("Heartbeat ({})", config.session.heartbeat_path.display());
            println!("  Timestamp:   {}", hb.timestamp);
            println!("  Mode:        {}", hb.mode);
            println!("  Queue depth: {}", hb.queue_depth);
            println!("  Running:     {}", hb.running);
        }
        Err(e) => println!("No heartbeat available: {e}"),
    }

    let store = SessionStore::new(
        config.session.session_path.clone(),
        config.session.max_backups,
    );
    match store.load() {
        Ok(Some(snapshot)) => {
            println!("Session ({})", config.session.session_path.display());
            println!("  Saved:       {}", snapshot.timestamp);
            println!("  Queued jobs: {}", snapshot.queue.len());
            for job in snapshot.queue.iter().take(10) {
                println!(
                    "    [{}] {} ({}, next {})",
                    job.priority, job.name, job.faucet, job.next_run
                );
            }
            if snapshot.queue.len() > 10 {
                println!("    ... and {} more", snapshot.queue.len() - 10);
            }
        }
        Ok(None) => println!("No session file"),
        Err(e) => println!("Session unreadable: {e}"),
    }

    Ok(())
}
