//! Timer-drift prediction
//!
//! Faucets routinely understate or overstate their claim timers. This module
//! keeps a bounded rolling history of stated-versus-actual wait times per
//! faucet and nudges the predicted next claim time by the observed average
//! drift, clamped so a few bad samples cannot swing the schedule wildly.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// One stated-versus-actual wait observation, in minutes
#[derive(Debug, Clone, Copy)]
pub struct TimerObservation {
    pub stated_minutes: f64,
    pub actual_minutes: f64,
}

impl TimerObservation {
    fn drift(&self) -> f64 {
        self.actual_minutes - self.stated_minutes
    }
}

/// Per-faucet rolling drift history and prediction
#[derive(Debug)]
pub struct TimerDriftTracker {
    history_size: usize,
    min_samples: usize,
    clamp_ratio: f64,
    history: HashMap<String, VecDeque<TimerObservation>>,
    // Last successful claim per faucet: (time, stated wait) pairs used to
    // derive the actual wait when the next claim lands.
    last_claim: HashMap<String, (DateTime<Utc>, f64)>,
}

impl Default for TimerDriftTracker {
    fn default() -> Self {
        Self::new(20)
    }
}

impl TimerDriftTracker {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            min_samples: 5,
            clamp_ratio: 0.10,
            history: HashMap::new(),
            last_claim: HashMap::new(),
        }
    }

    /// Record a stated-versus-actual observation
    pub fn record_observation(&mut self, faucet: &str, stated_minutes: f64, actual_minutes: f64) {
        if stated_minutes <= 0.0 || actual_minutes <= 0.0 {
            return;
        }
        let ring = self.history.entry(faucet.to_string()).or_default();
        ring.push_back(TimerObservation {
            stated_minutes,
            actual_minutes,
        });
        while ring.len() > self.history_size {
            ring.pop_front();
        }
    }

    /// Note a successful claim; derives an observation from the previous
    /// claim's stated wait versus the elapsed time since it
    pub fn note_claim(&mut self, faucet: &str, stated_minutes: f64, now: DateTime<Utc>) {
        if let Some((prev_time, prev_stated)) = self.last_claim.get(faucet).copied() {
            let actual = (now - prev_time).num_seconds() as f64 / 60.0;
            // Gaps far beyond the stated timer mean the bot was idle, not
            // that the faucet drifted; skip those samples.
            if actual > 0.0 && actual < prev_stated * 3.0 {
                self.record_observation(faucet, prev_stated, actual);
            }
        }
        self.last_claim
            .insert(faucet.to_string(), (now, stated_minutes));
    }

    /// Predicted wait in minutes for a stated timer value
    ///
    /// Returns `stated_minutes` unchanged until at least `min_samples`
    /// observations exist; afterwards applies the historical average drift
    /// clamped to +/- `clamp_ratio` of the stated value.
    pub fn predict(&self, faucet: &str, stated_minutes: f64) -> f64 {
        let Some(ring) = self.history.get(faucet) else {
            return stated_minutes;
        };
        if ring.len() < self.min_samples {
            return stated_minutes;
        }

        let avg_drift: f64 = ring.iter().map(TimerObservation::drift).sum::<f64>() / ring.len() as f64;
        let clamp = stated_minutes.abs() * self.clamp_ratio;
        let applied = avg_drift.clamp(-clamp, clamp);
        (stated_minutes + applied).max(0.0)
    }

    /// Number of recorded observations for a faucet
    pub fn sample_count(&self, faucet: &str) -> usize {
        self.history.get(faucet).map_or(0, VecDeque::len)
    }
}
