//! Job model and priority queue
//!
//! Jobs are the unit of scheduled work: a claim, a withdrawal, or the one-shot
//! auto-withdrawal check. The queue keeps a total order by
//! `(priority asc, next_run asc)` and deduplicates on `(profile_id, name)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Job Types
// ============================================================================

/// Kind of scheduled work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Periodic claim against a faucet
    Claim,
    /// One-shot withdrawal of accumulated balance
    Withdraw,
    /// One-shot scan for balances that crossed the withdrawal threshold
    AutoWithdrawalCheck,
}

impl JobKind {
    /// One-shot kinds are not re-enqueued after a successful run
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Withdraw | Self::AutoWithdrawalCheck)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Withdraw => "withdraw",
            Self::AutoWithdrawalCheck => "auto_withdrawal_check",
        }
    }
}

/// Identity of a job within the queue and running registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Owning account profile id
    pub profile_id: String,

    /// Job name, unique per profile
    pub name: String,
}

/// A unit of scheduled work
///
/// The profile is referenced by id; `AccountProfile`s are owned by
/// configuration and resolved through the scheduler's profile map at
/// execution and restore time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Static priority, lower runs first
    pub priority: i32,

    /// Earliest time this job may launch
    pub next_run: DateTime<Utc>,

    /// Job name, unique per profile (e.g. "claim:firefaucet")
    pub name: String,

    /// Owning account profile id
    pub profile_id: String,

    /// Target faucet identifier
    pub faucet: String,

    /// Kind of work
    pub kind: JobKind,

    /// Consecutive failed attempts so far
    pub retry_count: u32,
}

impl Job {
    /// Create a job ready to run immediately
    pub fn new(
        priority: i32,
        name: impl Into<String>,
        profile_id: impl Into<String>,
        faucet: impl Into<String>,
        kind: JobKind,
    ) -> Self {
        Self {
            priority,
            next_run: Utc::now(),
            name: name.into(),
            profile_id: profile_id.into(),
            faucet: faucet.into(),
            kind,
            retry_count: 0,
        }
    }

    /// Set the earliest launch time
    pub fn at(mut self, next_run: DateTime<Utc>) -> Self {
        self.next_run = next_run;
        self
    }

    /// Queue/running-registry identity
    pub fn key(&self) -> JobKey {
        JobKey {
            profile_id: self.profile_id.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether this job is ready to launch at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_run <= now
    }

    fn sort_key(&self) -> (i32, DateTime<Utc>) {
        (self.priority, self.next_run)
    }
}

// ============================================================================
// Job Queue
// ============================================================================

/// Priority queue of pending jobs
///
/// Kept sorted by `(priority, next_run)` on every insertion. Jobs are owned
/// exclusively by the queue; launching removes the job, and the job wrapper
/// re-inserts it on completion.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JobQueue {
    jobs: Vec<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job, keeping the queue sorted
    ///
    /// Returns `false` without inserting when a job with the same
    /// `(profile_id, name)` is already queued.
    pub fn insert(&mut self, job: Job) -> bool {
        if self.contains(&job.key()) {
            return false;
        }
        let pos = self
            .jobs
            .partition_point(|j| j.sort_key() <= job.sort_key());
        self.jobs.insert(pos, job);
        true
    }

    /// Whether a job with this key is queued
    pub fn contains(&self, key: &JobKey) -> bool {
        self.jobs
            .iter()
            .any(|j| j.profile_id == key.profile_id && j.name == key.name)
    }

    /// Remove and return the job with this key
    pub fn remove(&mut self, key: &JobKey) -> Option<Job> {
        let pos = self
            .jobs
            .iter()
            .position(|j| j.profile_id == key.profile_id && j.name == key.name)?;
        Some(self.jobs.remove(pos))
    }

    /// Remove all jobs matching the predicate, returning the removed jobs
    pub fn purge<F>(&mut self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            if predicate(&self.jobs[i]) {
                removed.push(self.jobs.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Push a queued job's next_run forward, keeping the order intact
    pub fn defer(&mut self, key: &JobKey, next_run: DateTime<Utc>) -> bool {
        match self.remove(key) {
            Some(mut job) => {
                job.next_run = next_run;
                let pos = self.jobs.partition_point(|j| j.sort_key() <= job.sort_key());
                self.jobs.insert(pos, job);
                true
            }
            None => false,
        }
    }

    /// Snapshot of jobs whose `next_run` has passed
    pub fn ready_jobs(&self, now: DateTime<Utc>) -> Vec<Job> {
        self.jobs.iter().filter(|j| j.is_ready(now)).cloned().collect()
    }

    /// Whether any queued job targets this faucet
    pub fn has_faucet(&self, faucet: &str) -> bool {
        self.jobs.iter().any(|j| j.faucet == faucet)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Verify the `(priority, next_run)` total order
    pub fn is_sorted(&self) -> bool {
        self.jobs.windows(2).all(|w| w[0].sort_key() <= w[1].sort_key())
    }

    /// Replace contents wholesale (session restore)
    pub fn replace(&mut self, jobs: Vec<Job>) {
        let mut seen = std::collections::HashSet::new();
        let mut jobs: Vec<Job> = jobs
            .into_iter()
            .filter(|j| seen.insert(j.key()))
            .collect();
        jobs.sort_by_key(Job::sort_key);
        self.jobs = jobs;
    }
}

// ============================================================================
// Tests
// ============================================================================
