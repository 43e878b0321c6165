//! Proxy rotation strategies
//!
//! Three strategies are supported per account profile: round-robin over the
//! eligible pool, uniform random, and sticky (the profile keeps its assigned
//! proxy until that proxy leaves the pool). The rotation state also remembers
//! each profile's last proxy so sticky sessions survive an empty or fully
//! unhealthy pool.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-profile proxy selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    /// Keep the profile pinned to one proxy for session stickiness
    Sticky,
}

/// Mutable rotation bookkeeping shared by all strategies
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RotationState {
    rr_index: usize,
    /// Last proxy key handed to each profile
    sticky: HashMap<String, String>,
}

impl RotationState {
    /// Pick a proxy key from the eligible pool for a profile
    ///
    /// Falls back to the profile's previously sticky proxy when the eligible
    /// pool is empty, so an established session is preferred over nothing.
    pub fn next(
        &mut self,
        profile_id: &str,
        strategy: RotationStrategy,
        eligible: &[String],
    ) -> Option<String> {
        if eligible.is_empty() {
            return self.sticky.get(profile_id).cloned();
        }

        let key = match strategy {
            RotationStrategy::RoundRobin => {
                let key = eligible[self.rr_index % eligible.len()].clone();
                self.rr_index = self.rr_index.wrapping_add(1);
                key
            }
            RotationStrategy::Random => eligible
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| eligible[0].clone()),
            RotationStrategy::Sticky => match self.sticky.get(profile_id) {
                Some(current) if eligible.contains(current) => current.clone(),
                _ => eligible[0].clone(),
            },
        };

        self.sticky.insert(profile_id.to_string(), key.clone());
        Some(key)
    }

    /// Static round-robin assignment of proxies to profiles
    ///
    /// Used at startup to pin profiles to proxies 1:1 so sticky sessions
    /// survive restarts.
    pub fn assign(&mut self, profile_ids: &[String], pool: &[String]) -> HashMap<String, String> {
        let mut assignments = HashMap::new();
        if pool.is_empty() {
            return assignments;
        }
        for (i, profile_id) in profile_ids.iter().enumerate() {
            let key = pool[i % pool.len()].clone();
            self.sticky.insert(profile_id.clone(), key.clone());
            assignments.insert(profile_id.clone(), key);
        }
        assignments
    }

    /// Previously assigned proxy for a profile, if any
    pub fn sticky_for(&self, profile_id: &str) -> Option<&String> {
        self.sticky.get(profile_id)
    }

    /// Drop sticky entries pointing at proxies no longer in the master list
    pub fn retain_known(&mut self, known: &[String]) {
        self.sticky.retain(|_, key| known.contains(key));
    }
}
