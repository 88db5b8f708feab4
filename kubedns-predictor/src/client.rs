use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

use kubedns_proto::packet::QueryType;

use crate::ServiceRef;

const RING_CAPACITY: usize = 20;
const INACTIVITY_EVICT_SECS: f64 = 3600.0;
const DEPENDENCY_WINDOW: usize = 5;
const DEPENDENCY_WINDOW_SECS: f64 = 5.0;

#[derive(Debug, Clone)]
struct Observation {
    service: ServiceRef,
    #[allow(dead_code)]
    qtype: QueryType,
    at: SystemTime,
}

/// Ring buffer of the last [`RING_CAPACITY`] observations for one
/// client, plus a running frequency histogram. Evicted by its owner
/// after [`INACTIVITY_EVICT_SECS`] of silence.
#[derive(Default)]
pub struct ClientProfile {
    ring: VecDeque<Observation>,
    frequency: HashMap<ServiceRef, u32>,
    last_active: Option<SystemTime>,
}

impl ClientProfile {
    pub fn record(&mut self, service: ServiceRef, qtype: QueryType, now: SystemTime) {
        if self.ring.len() == RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(Observation {
            service: service.clone(),
            qtype,
            at: now,
        });
        *self.frequency.entry(service).or_insert(0) += 1;
        self.last_active = Some(now);
    }

    /// Services seen in the last [`DEPENDENCY_WINDOW`] entries within
    /// [`DEPENDENCY_WINDOW_SECS`] of `now`, excluding `exclude` —
    /// candidate "from" services for a dependency edge into `exclude`.
    pub fn recent_companions(&self, exclude: &ServiceRef, now: SystemTime) -> Vec<ServiceRef> {
        self.ring
            .iter()
            .rev()
            .take(DEPENDENCY_WINDOW)
            .filter(|obs| obs.service != *exclude)
            .filter(|obs| {
                now.duration_since(obs.at)
                    .map(|d| d.as_secs_f64() <= DEPENDENCY_WINDOW_SECS)
                    .unwrap_or(false)
            })
            .map(|obs| obs.service.clone())
            .collect()
    }

    pub fn frequency_score(&self, service: &ServiceRef) -> f64 {
        let total: u32 = self.frequency.values().sum();
        if total == 0 {
            return 0.0;
        }
        *self.frequency.get(service).unwrap_or(&0) as f64 / total as f64
    }

    pub fn is_stale(&self, now: SystemTime) -> bool {
        match self.last_active {
            Some(t) => now
                .duration_since(t)
                .map(|d| d.as_secs_f64() > INACTIVITY_EVICT_SECS)
                .unwrap_or(false),
            None => true,
        }
    }
}
