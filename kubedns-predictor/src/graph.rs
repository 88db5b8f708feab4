use std::collections::HashMap;
use std::time::SystemTime;

use crate::ServiceRef;

/// Reinforcement stats for one `from -> to` edge.
#[derive(Debug, Clone, Copy)]
pub struct EdgeStats {
    pub count: u32,
    pub total_time_between_secs: f64,
    pub last_seen: SystemTime,
    pub confidence: f64,
}

impl EdgeStats {
    fn new(now: SystemTime) -> Self {
        Self {
            count: 1,
            total_time_between_secs: 0.0,
            last_seen: now,
            confidence: 0.0,
        }
    }

    fn reinforce(&mut self, now: SystemTime) {
        if let Ok(gap) = now.duration_since(self.last_seen) {
            self.total_time_between_secs += gap.as_secs_f64();
        }
        self.count += 1;
        self.last_seen = now;
    }

    fn recompute_confidence(&mut self, now: SystemTime) {
        let freq = (((self.count + 1) as f64).log10() / 2.0).min(1.0);
        let hours_since = now
            .duration_since(self.last_seen)
            .map(|d| d.as_secs_f64() / 3600.0)
            .unwrap_or(0.0);
        let recency = (-hours_since / 24.0).exp();
        let avg_gap = if self.count > 0 {
            self.total_time_between_secs / self.count as f64
        } else {
            0.0
        };
        let consistency = 1.0 / (1.0 + avg_gap / 5.0);
        self.confidence = 0.5 * freq + 0.3 * recency + 0.2 * consistency;
    }
}

/// Per-`from`-service map to reinforcement stats for each observed
/// `to`-service, used for both the forward and reverse prediction
/// signals.
#[derive(Default)]
pub struct DependencyGraph {
    edges: HashMap<ServiceRef, HashMap<ServiceRef, EdgeStats>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reinforce(&mut self, from: &ServiceRef, to: &ServiceRef, now: SystemTime) {
        let bucket = self.edges.entry(from.clone()).or_default();
        match bucket.get_mut(to) {
            Some(stats) => {
                stats.reinforce(now);
                stats.recompute_confidence(now);
            }
            None => {
                let mut stats = EdgeStats::new(now);
                stats.recompute_confidence(now);
                bucket.insert(to.clone(), stats);
            }
        }
    }

    pub fn confidence(&self, from: &ServiceRef, to: &ServiceRef) -> f64 {
        self.edges
            .get(from)
            .and_then(|m| m.get(to))
            .map(|s| s.confidence)
            .unwrap_or(0.0)
    }

    /// Services ever observed as a target from `from`.
    pub fn candidates_from(&self, from: &ServiceRef) -> Vec<ServiceRef> {
        self.edges
            .get(from)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Services that have `to` as a target — the reverse direction.
    pub fn candidates_to(&self, to: &ServiceRef) -> Vec<ServiceRef> {
        self.edges
            .iter()
            .filter_map(|(from, tos)| tos.contains_key(to).then(|| from.clone()))
            .collect()
    }

    /// Drops edges untouched for longer than `stale_after_secs` and
    /// recomputes confidence (recency decays even without new events).
    pub fn sweep(&mut self, now: SystemTime, stale_after_secs: f64) {
        self.edges.retain(|_from, tos| {
            tos.retain(|_to, stats| {
                let age = now
                    .duration_since(stats.last_seen)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                if age > stale_after_secs {
                    return false;
                }
                stats.recompute_confidence(now);
                true
            });
            !tos.is_empty()
        });
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|m| m.len()).sum()
    }
}
