//! Alert deduplication.
//!
//! A detection that persists across frames would otherwise alert on every
//! sampled frame. The deduplicator keeps a cooldown ledger keyed by
//! `(hazard_type, location)` and suppresses repeats until the cooldown
//! window has elapsed.
//!
//! The ledger lives only for the session's lifetime and grows with the
//! number of distinct hazard/location pairs seen, not with frame count.

use std::collections::HashMap;

/// Default cooldown window between repeated alerts for the same pair.
pub const DEFAULT_COOLDOWN_SECS: f64 = 300.0;

/// Cooldown-based filter for repeated `(hazard_type, location)` detections.
///
/// Matching is case-insensitive on both fields and nothing else: "Scaffold"
/// and "scaffolding" are distinct keys. Near-duplicate phrasing therefore
/// under-deduplicates; that is the intended behavior, not a defect to fix
/// here.
pub struct HazardDeduplicator {
    cooldown_s: f64,
    last_seen: HashMap<(String, String), f64>,
}

impl HazardDeduplicator {
    pub fn new(cooldown_s: f64) -> Self {
        Self {
            cooldown_s,
            last_seen: HashMap::new(),
        }
    }

    /// Decide whether an alert should fire for this pair at this timestamp.
    ///
    /// The first sighting of a pair always alerts. A repeat alerts only once
    /// the cooldown has fully elapsed, at which point the ledger timestamp
    /// is advanced. Suppressed repeats do not mutate the ledger.
    pub fn should_alert(&mut self, hazard_type: &str, location: &str, timestamp_s: f64) -> bool {
        let key = (hazard_type.to_lowercase(), location.to_lowercase());
        match self.last_seen.get(&key) {
            None => {
                self.last_seen.insert(key, timestamp_s);
                true
            }
            Some(&last) if timestamp_s - last >= self.cooldown_s => {
                self.last_seen.insert(key, timestamp_s);
                true
            }
            Some(_) => false,
        }
    }

    /// Clear every cooldown timer. Used when a session restarts.
    pub fn reset(&mut self) {
        self.last_seen.clear();
    }

    /// Number of distinct pairs currently tracked.
    pub fn tracked_pairs(&self) -> usize {
        self.last_seen.len()
    }
}

impl Default for HazardDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECS)
    }
}
