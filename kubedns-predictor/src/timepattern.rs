use std::collections::HashMap;

use crate::ServiceRef;

const TOP_N: usize = 10;
const HOURS: usize = 24;
const DAYS: usize = 7;

/// Bounded top-N additive-weight list for one hour-of-day or
/// day-of-week slot.
#[derive(Default)]
struct Bucket {
    weights: HashMap<ServiceRef, f64>,
}

impl Bucket {
    fn add(&mut self, service: &ServiceRef, weight: f64) {
        *self.weights.entry(service.clone()).or_insert(0.0) += weight;
        if self.weights.len() > TOP_N {
            if let Some(min_key) = self
                .weights
                .iter()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(k, _)| k.clone())
            {
                self.weights.remove(&min_key);
            }
        }
    }

    fn normalized_weight(&self, service: &ServiceRef) -> f64 {
        let max = self.weights.values().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return 0.0;
        }
        self.weights.get(service).copied().unwrap_or(0.0) / max
    }

    fn decay(&mut self, factor: f64) {
        self.weights.retain(|_, w| {
            *w *= factor;
            *w > 0.01
        });
    }
}

/// Hourly and daily service popularity, each a bounded top-N table per
/// slot so the tables stay cheap regardless of cluster size.
pub struct TimePatterns {
    hourly: Vec<Bucket>,
    daily: Vec<Bucket>,
}

impl Default for TimePatterns {
    fn default() -> Self {
        Self {
            hourly: (0..HOURS).map(|_| Bucket::default()).collect(),
            daily: (0..DAYS).map(|_| Bucket::default()).collect(),
        }
    }
}

impl TimePatterns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, service: &ServiceRef, hour_of_day: usize, day_of_week: usize) {
        self.hourly[hour_of_day % HOURS].add(service, 1.0);
        self.daily[day_of_week % DAYS].add(service, 1.0);
    }

    pub fn hourly_score(&self, service: &ServiceRef, hour_of_day: usize) -> f64 {
        self.hourly[hour_of_day % HOURS].normalized_weight(service)
    }

    pub fn daily_score(&self, service: &ServiceRef, day_of_week: usize) -> f64 {
        self.daily[day_of_week % DAYS].normalized_weight(service)
    }

    /// Applies exponential decay so patterns favor recent behavior;
    /// run from the 5-minute sweep.
    pub fn sweep(&mut self, decay_factor: f64) {
        for bucket in self.hourly.iter_mut().chain(self.daily.iter_mut()) {
            bucket.decay(decay_factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str) -> ServiceRef {
        ServiceRef::new("default", name)
    }

    #[test]
    fn most_observed_service_scores_highest_in_its_slot() {
        let mut patterns = TimePatterns::new();
        patterns.observe(&svc("web"), 9, 1);
        patterns.observe(&svc("web"), 9, 1);
        patterns.observe(&svc("auth"), 9, 1);

        assert_eq!(patterns.hourly_score(&svc("web"), 9), 1.0);
        assert!(patterns.hourly_score(&svc("auth"), 9) < 1.0);
        assert_eq!(patterns.hourly_score(&svc("web"), 10), 0.0);
    }

    #[test]
    fn top_n_eviction_keeps_bucket_bounded() {
        let mut patterns = TimePatterns::new();
        for i in 0..(TOP_N + 5) {
            patterns.observe(&svc(&format!("svc-{i}")), 3, 2);
        }
        assert!(patterns.hourly[3].weights.len() <= TOP_N);
    }

    #[test]
    fn sweep_decays_weights_toward_zero() {
        let mut patterns = TimePatterns::new();
        patterns.observe(&svc("web"), 9, 1);
        for _ in 0..20 {
            patterns.sweep(0.5);
        }
        assert_eq!(patterns.hourly_score(&svc("web"), 9), 0.0);
    }
}
