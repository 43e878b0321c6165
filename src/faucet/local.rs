//! Built-in collaborator implementations
//!
//! Minimal in-process implementations of the collaborator traits, used by the
//! CLI daemon when no external integrations are wired in, and by tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::browser::{BrowserManager, PageHandle};
use super::{AccountProfile, AnalyticsSink, BudgetProvider, FaucetEconomics, JobOutcomeRecord};
use crate::proxy::record::ProxyEndpoint;

// ============================================================================
// Browser
// ============================================================================

/// Browser manager that hands out handles without driving a real browser
///
/// Stands in for the external browser integration; always healthy unless
/// poisoned, restart flips it healthy again.
#[derive(Debug, Default)]
pub struct NoopBrowser {
    unhealthy: AtomicBool,
}

impl NoopBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the health probe to fail until the next restart
    pub fn poison(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserManager for NoopBrowser {
    async fn acquire_page(
        &self,
        profile: &AccountProfile,
        proxy: Option<&ProxyEndpoint>,
    ) -> anyhow::Result<PageHandle> {
        if self.unhealthy.load(Ordering::SeqCst) {
            anyhow::bail!("browser is unhealthy");
        }
        Ok(PageHandle::new(
            profile.id.clone(),
            proxy.map(|p| p.key()),
        ))
    }

    async fn close_page(&self, _page: PageHandle) -> anyhow::Result<()> {
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }

    async fn restart(&self) -> anyhow::Result<()> {
        self.unhealthy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Budget
// ============================================================================

/// Budget provider backed by a fixed daily allowance and in-memory spend
#[derive(Debug)]
pub struct FixedBudget {
    daily_budget_usd: f64,
    state: RwLock<BudgetState>,
}

#[derive(Debug, Default)]
struct BudgetState {
    spent_today_usd: f64,
    economics: HashMap<String, FaucetEconomics>,
}

impl FixedBudget {
    pub fn new(daily_budget_usd: f64) -> Self {
        Self {
            daily_budget_usd,
            state: RwLock::new(BudgetState::default()),
        }
    }

    /// Record spend against today's budget
    pub async fn record_spend(&self, usd: f64) {
        self.state.write().await.spent_today_usd += usd;
    }

    /// Seed economics for a faucet (primarily for tests and replays)
    pub async fn set_economics(&self, faucet: &str, economics: FaucetEconomics) {
        self.state
            .write()
            .await
            .economics
            .insert(faucet.to_string(), economics);
    }
}

#[async_trait]
impl BudgetProvider for FixedBudget {
    async fn remaining_budget_usd(&self) -> anyhow::Result<f64> {
        let state = self.state.read().await;
        Ok((self.daily_budget_usd - state.spent_today_usd).max(0.0))
    }

    async fn daily_budget_exhausted(&self) -> anyhow::Result<bool> {
        Ok(self.remaining_budget_usd().await? <= 0.0)
    }

    async fn faucet_economics(&self, faucet: &str) -> anyhow::Result<Option<FaucetEconomics>> {
        Ok(self.state.read().await.economics.get(faucet).copied())
    }
}

// ============================================================================
// Analytics
// ============================================================================

/// Analytics sink appending one JSON record per line
pub struct JsonlAnalytics {
    path: PathBuf,
}

impl JsonlAnalytics {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AnalyticsSink for JsonlAnalytics {
    async fn record_outcome(&self, record: &JobOutcomeRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        // Dropping a tokio file without flushing may leave the write buffered.
        file.flush().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::RotationStrategy;
    use crate::scheduler::job::JobKind;
    use uuid::Uuid;

    fn profile() -> AccountProfile {
        AccountProfile {
            id: "p1".to_string(),
            username: "alice".to_string(),
            faucets: vec!["firefaucet".to_string()],
            max_concurrent_jobs: 1,
            proxy_strategy: RotationStrategy::RoundRobin,
            wallet_address: None,
        }
    }

    #[tokio::test]
    async fn test_noop_browser_lifecycle() {
        let browser = NoopBrowser::new();
        assert!(browser.is_healthy().await);

        let page = browser.acquire_page(&profile(), None).await.unwrap();
        assert_eq!(page.profile_id, "p1");
        browser.close_page(page).await.unwrap();

        browser.poison();
        assert!(!browser.is_healthy().await);
        assert!(browser.acquire_page(&profile(), None).await.is_err());

        browser.restart().await.unwrap();
        assert!(browser.is_healthy().await);
    }

    #[tokio::test]
    async fn test_fixed_budget_tracks_spend() {
        let budget = FixedBudget::new(5.0);
        assert_eq!(budget.remaining_budget_usd().await.unwrap(), 5.0);

        budget.record_spend(4.0).await;
        assert_eq!(budget.remaining_budget_usd().await.unwrap(), 1.0);
        assert!(!budget.daily_budget_exhausted().await.unwrap());

        budget.record_spend(2.0).await;
        assert_eq!(budget.remaining_budget_usd().await.unwrap(), 0.0);
        assert!(budget.daily_budget_exhausted().await.unwrap());
    }

    #[tokio::test]
    async fn test_jsonl_analytics_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let sink = JsonlAnalytics::new(&path);

        let record = JobOutcomeRecord {
            run_id: Uuid::new_v4(),
            faucet: "firefaucet".to_string(),
            profile_id: "p1".to_string(),
            kind: JobKind::Claim,
            success: true,
            status: "claimed".to_string(),
            error_type: None,
            amount: Some(0.5),
            currency: Some("TRX".to_string()),
            recorded_at: Utc::now(),
        };
        sink.record_outcome(&record).await.unwrap();
        sink.record_outcome(&record).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("firefaucet"));
    }
}
