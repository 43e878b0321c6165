//! Session persistence
//!
//! The scheduler's restorable state (queued jobs plus per-domain access
//! times) is snapshotted to a JSON file. Writes are atomic (temp file +
//! rename) and every successful save is mirrored to numbered backups,
//! `backup.1` newest, so a corrupted main file never loses the last
//! known-good snapshot. A small heartbeat file is written alongside for
//! external liveness checks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::scheduler::job::Job;

// ============================================================================
// Errors
// ============================================================================

/// Session persistence errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Main file and every backup failed to parse
    #[error("No valid session snapshot at {path} or its backups")]
    NoValidSnapshot { path: String },
}

// ============================================================================
// Snapshot
// ============================================================================

/// Restorable scheduler state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub queue: Vec<Job>,
    pub domain_last_access: HashMap<String, DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(queue: Vec<Job>, domain_last_access: HashMap<String, DateTime<Utc>>) -> Self {
        Self {
            queue,
            domain_last_access,
            timestamp: Utc::now(),
        }
    }
}

/// Same shape as [`SessionSnapshot`] but with untyped queue entries, so one
/// malformed record is skipped instead of discarding the whole file
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    queue: Vec<serde_json::Value>,
    #[serde(default)]
    domain_last_access: HashMap<String, DateTime<Utc>>,
    timestamp: DateTime<Utc>,
}

// ============================================================================
// Session Store
// ============================================================================

/// Atomic JSON session store with numbered backups
pub struct SessionStore {
    path: PathBuf,
    max_backups: usize,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            path: path.into(),
            max_backups,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".backup.{n}"));
        PathBuf::from(name)
    }

    /// Persist a snapshot: shift older backups up, write a temp file, rename
    /// it over the main path, then mirror the new file to `backup.1`
    ///
    /// The mirror runs after the rename, so `backup.1` always holds the most
    /// recent successful save. A later corruption of the main file can only
    /// lose what was never durably written.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.shift_backups()?;

        let temp = {
            let mut name = self.path.as_os_str().to_owned();
            name.push(".tmp");
            PathBuf::from(name)
        };
        let file = File::create(&temp)?;
        serde_json::to_writer_pretty(BufWriter::new(file), snapshot)?;
        fs::rename(&temp, &self.path)?;
        if self.max_backups > 0 {
            fs::copy(&self.path, self.backup_path(1))?;
        }

        tracing::debug!(
            path = %self.path.display(),
            jobs = snapshot.queue.len(),
            "Session saved"
        );
        Ok(())
    }

    /// Shift `backup.N-1 -> backup.N`, freeing slot 1 for the upcoming save
    fn shift_backups(&self) -> Result<(), SessionError> {
        if self.max_backups == 0 {
            return Ok(());
        }
        let oldest = self.backup_path(self.max_backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_backups).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        Ok(())
    }

    /// Restore the newest valid snapshot
    ///
    /// Tries the main file first, then backups newest-first. Returns
    /// `Ok(None)` when neither the main file nor any backup exists; errors
    /// only when files exist but none parses. Jobs whose `next_run` is more
    /// than an hour in the past are rebased to now so a restored queue does
    /// not dogpile.
    pub fn load(&self) -> Result<Option<SessionSnapshot>, SessionError> {
        let mut candidates = vec![self.path.clone()];
        for n in 1..=self.max_backups {
            candidates.push(self.backup_path(n));
        }

        let mut any_exists = false;
        for candidate in &candidates {
            if !candidate.exists() {
                continue;
            }
            any_exists = true;
            match Self::read_snapshot(candidate) {
                Ok(snapshot) => {
                    if *candidate != self.path {
                        tracing::warn!(
                            backup = %candidate.display(),
                            "Main session file unusable, restored from backup"
                        );
                    }
                    return Ok(Some(snapshot));
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Skipping unreadable session file"
                    );
                }
            }
        }

        if any_exists {
            Err(SessionError::NoValidSnapshot {
                path: self.path.display().to_string(),
            })
        } else {
            Ok(None)
        }
    }

    fn read_snapshot(path: &Path) -> Result<SessionSnapshot, SessionError> {
        let file = File::open(path)?;
        let raw: RawSnapshot = serde_json::from_reader(BufReader::new(file))?;

        let now = Utc::now();
        let stale_cutoff = now - Duration::hours(1);
        let mut queue = Vec::with_capacity(raw.queue.len());
        for value in raw.queue {
            match serde_json::from_value::<Job>(value) {
                Ok(mut job) => {
                    if job.next_run < stale_cutoff {
                        job.next_run = now;
                    }
                    queue.push(job);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed job record in session");
                }
            }
        }

        Ok(SessionSnapshot {
            queue,
            domain_last_access: raw.domain_last_access,
            timestamp: raw.timestamp,
        })
    }
}

// ============================================================================
// Heartbeat
// ============================================================================

/// Liveness beacon written during scheduler maintenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub queue_depth: usize,
    pub running: usize,
}

impl Heartbeat {
    pub fn new(mode: impl Into<String>, queue_depth: usize, running: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            mode: mode.into(),
            queue_depth,
            running,
        }
    }

    /// Write atomically, same temp+rename discipline as the session file
    pub fn write(&self, path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("json.tmp");
        let file = File::create(&temp)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, SessionError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{Job, JobKind};

    fn job(name: &str, next_run: DateTime<Utc>) -> Job {
        Job::new(5, name, "p1", "firefaucet", JobKind::Claim).at(next_run)
    }

    fn snapshot(jobs: Vec<Job>) -> SessionSnapshot {
        let mut domains = HashMap::new();
        domains.insert("firefaucet".to_string(), Utc::now());
        SessionSnapshot::new(jobs, domains)
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), 3);

        let soon = Utc::now() + Duration::minutes(10);
        store.save(&snapshot(vec![job("claim", soon)])).unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored.queue.len(), 1);
        assert_eq!(restored.queue[0].name, "claim");
        assert_eq!(restored.domain_last_access.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), 3);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_backups_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::new(&path, 2);

        let soon = Utc::now() + Duration::minutes(10);
        for i in 0..4 {
            store.save(&snapshot(vec![job(&format!("j{i}"), soon)])).unwrap();
        }

        assert!(path.exists());
        assert!(dir.path().join("session.json.backup.1").exists());
        assert!(dir.path().join("session.json.backup.2").exists());
        assert!(!dir.path().join("session.json.backup.3").exists());

        // backup.1 mirrors the newest save; backup.2 holds the prior one.
        let backup1: SessionSnapshot = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("session.json.backup.1")).unwrap(),
        )
        .unwrap();
        assert_eq!(backup1.queue[0].name, "j3");
        let backup2: SessionSnapshot = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("session.json.backup.2")).unwrap(),
        )
        .unwrap();
        assert_eq!(backup2.queue[0].name, "j2");
    }

    #[test]
    fn test_corrupted_main_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::new(&path, 3);

        let soon = Utc::now() + Duration::minutes(10);
        store.save(&snapshot(vec![job("good", soon)])).unwrap();
        store.save(&snapshot(vec![job("newer", soon)])).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored.queue[0].name, "newer");
    }

    #[test]
    fn test_all_files_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::new(&path, 1);
        std::fs::write(&path, "garbage").unwrap();

        assert!(matches!(
            store.load(),
            Err(SessionError::NoValidSnapshot { .. })
        ));
    }

    #[test]
    fn test_stale_next_run_rebased() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"), 1);

        let stale = Utc::now() - Duration::hours(3);
        let fresh = Utc::now() + Duration::minutes(30);
        store
            .save(&snapshot(vec![job("stale", stale), job("fresh", fresh)]))
            .unwrap();

        let restored = store.load().unwrap().unwrap();
        let restored_stale = restored.queue.iter().find(|j| j.name == "stale").unwrap();
        let restored_fresh = restored.queue.iter().find(|j| j.name == "fresh").unwrap();
        assert!(restored_stale.next_run >= Utc::now() - Duration::minutes(1));
        assert!((restored_fresh.next_run - fresh).num_seconds().abs() < 2);
    }

    #[test]
    fn test_malformed_job_records_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::new(&path, 1);

        let good = serde_json::to_value(job("good", Utc::now() + Duration::minutes(5))).unwrap();
        let body = serde_json::json!({
            "queue": [good, {"name": "broken"}],
            "domain_last_access": {},
            "timestamp": Utc::now(),
        });
        std::fs::write(&path, serde_json::to_string(&body).unwrap()).unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored.queue.len(), 1);
        assert_eq!(restored.queue[0].name, "good");
    }

    #[test]
    fn test_heartbeat_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");

        Heartbeat::new("normal", 12, 3).write(&path).unwrap();
        let read = Heartbeat::read(&path).unwrap();
        assert_eq!(read.mode, "normal");
        assert_eq!(read.queue_depth, 12);
        assert_eq!(read.running, 3);
    }
}
