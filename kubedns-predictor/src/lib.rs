//! Predicts follow-up DNS queries from a client's recent history and
//! schedules prefetches to warm the wire cache ahead of demand.

pub mod client;
pub mod graph;
pub mod namespace;
pub mod strategy;
pub mod timepattern;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use kubedns_proto::packet::QueryType;
use parking_lot::{Mutex, RwLock};

pub use strategy::{PrefetchCandidate, PrefetchStrategy};

const PATTERN_SWEEP_STALE_EDGE_SECS: f64 = 24.0 * 3600.0;
const PATTERN_SWEEP_DECAY: f64 = 0.9;
const EMIT_THRESHOLD: f64 = 0.1;
const TOP_CANDIDATES: usize = 5;

/// A service identity as the predictor sees it: namespace plus base
/// name, independent of cluster domain or record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn base_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredService {
    pub service: ServiceRef,
    pub score: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    fn default_enabled() -> bool {
        true
    }

    pub fn build(self) -> Predictor {
        Predictor::new(self.enabled)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub edges: usize,
    pub clients: usize,
    pub predictions_emitted: u64,
    pub prefetches: u64,
}

/// Seconds since the Unix epoch was a Thursday; this offsets into
/// `0 == Monday` without pulling in a calendar dependency.
fn hour_and_day_of_week(now: SystemTime) -> (usize, usize) {
    let secs = now.duration_since(SystemTime::UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
    let hour = ((secs / 3600) % 24) as usize;
    let days_since_epoch = secs / 86_400;
    // 1970-01-01 was a Thursday: weekday index 3 if Monday == 0.
    let day = ((days_since_epoch + 3) % 7) as usize;
    (hour, day)
}

/// Observation ingestion, prediction scoring, and prefetch scheduling
/// for service-to-service DNS traffic. Each shared table takes the
/// lock granularity called out for it: one process-wide RWMutex for
/// the dependency graph, one dedicated RWMutex for the time-pattern
/// tables, and a per-client mutex behind an outer RWMutex guarding the
/// client map's own structure.
pub struct Predictor {
    enabled: bool,
    graph: RwLock<graph::DependencyGraph>,
    clients: RwLock<HashMap<IpAddr, Mutex<client::ClientProfile>>>,
    patterns: RwLock<timepattern::TimePatterns>,
    namespaces: RwLock<namespace::NamespaceCorrelation>,
    predictions_emitted: std::sync::atomic::AtomicU64,
    prefetches: std::sync::atomic::AtomicU64,
}

impl Predictor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            graph: RwLock::new(graph::DependencyGraph::new()),
            clients: RwLock::new(HashMap::new()),
            patterns: RwLock::new(timepattern::TimePatterns::new()),
            namespaces: RwLock::new(namespace::NamespaceCorrelation::new()),
            predictions_emitted: std::sync::atomic::AtomicU64::new(0),
            prefetches: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Records a served query. Only A/AAAA observations feed the
    /// dependency graph and pattern tables, per the observation model.
    pub fn observe(&self, client: IpAddr, service: ServiceRef, qtype: QueryType, now: SystemTime) {
        if !self.enabled || !matches!(qtype, QueryType::A | QueryType::AAAA) {
            return;
        }

        let companions = self.record_and_companions(client, service.clone(), qtype, now);

        if !companions.is_empty() {
            let mut graph = self.graph.write();
            for companion in &companions {
                graph.reinforce(companion, &service, now);
            }
            drop(graph);

            let mut namespaces = self.namespaces.write();
            for companion in &companions {
                namespaces.observe_together(&service.namespace, companion, &service);
            }
        }

        let (hour, day) = hour_and_day_of_week(now);
        self.patterns.write().observe(&service, hour, day);
    }

    fn record_and_companions(
        &self,
        client: IpAddr,
        service: ServiceRef,
        qtype: QueryType,
        now: SystemTime,
    ) -> Vec<ServiceRef> {
        {
            let clients = self.clients.read();
            if let Some(profile_lock) = clients.get(&client) {
                let mut profile = profile_lock.lock();
                let companions = profile.recent_companions(&service, now);
                profile.record(service, qtype, now);
                return companions;
            }
        }
        let mut clients = self.clients.write();
        let profile_lock = clients.entry(client).or_default();
        let mut profile = profile_lock.lock();
        profile.record(service, qtype, now);
        Vec::new()
    }

    /// Ranks candidate follow-up services for `current`, returning at
    /// most [`TOP_CANDIDATES`] scoring ≥ [`EMIT_THRESHOLD`], sorted by
    /// descending score.
    pub fn predict(&self, client: IpAddr, current: &ServiceRef, now: SystemTime) -> Vec<ScoredService> {
        if !self.enabled {
            return Vec::new();
        }
        let (hour, day) = hour_and_day_of_week(now);

        let mut candidates: Vec<ServiceRef> = {
            let graph = self.graph.read();
            let mut set = graph.candidates_from(current);
            set.extend(graph.candidates_to(current));
            set
        };
        candidates.retain(|c| c != current);
        candidates.sort();
        candidates.dedup();

        let freq_scores: HashMap<ServiceRef, f64> = {
            let clients = self.clients.read();
            match clients.get(&client) {
                Some(profile_lock) => {
                    let profile = profile_lock.lock();
                    candidates
                        .iter()
                        .map(|c| (c.clone(), profile.frequency_score(c)))
                        .collect()
                }
                None => HashMap::new(),
            }
        };

        let graph = self.graph.read();
        let patterns = self.patterns.read();
        let namespaces = self.namespaces.read();

        let mut scored: Vec<ScoredService> = candidates
            .into_iter()
            .map(|candidate| {
                let forward = graph.confidence(current, &candidate);
                let reverse = graph.confidence(&candidate, current);
                let hourly = patterns.hourly_score(&candidate, hour);
                let daily = patterns.daily_score(&candidate, day);
                let freq = freq_scores.get(&candidate).copied().unwrap_or(0.0);
                let ns_corr = namespaces.score(&current.namespace, current, &candidate);

                let score =
                    0.4 * forward + 0.2 * reverse + 0.2 * hourly + 0.3 * freq + 0.1 * daily + 0.1 * ns_corr;
                ScoredService { service: candidate, score }
            })
            .filter(|s| s.score >= EMIT_THRESHOLD)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(TOP_CANDIDATES);
        self.predictions_emitted
            .fetch_add(scored.len() as u64, std::sync::atomic::Ordering::Relaxed);
        scored
    }

    /// Turns ranked predictions into prefetch candidates per the
    /// importance-boosted priority strategy.
    pub fn prefetch_candidates(
        &self,
        predictions: Vec<ScoredService>,
        current_qtype: QueryType,
    ) -> Vec<PrefetchCandidate> {
        let candidates: Vec<PrefetchCandidate> = predictions
            .into_iter()
            .filter_map(|p| PrefetchStrategy::evaluate(p.service, p.score, current_qtype))
            .collect();
        self.prefetches
            .fetch_add(candidates.len() as u64, std::sync::atomic::Ordering::Relaxed);
        candidates
    }

    /// Prunes stale edges/clients and decays pattern weights; run on a
    /// 5-minute interval.
    pub fn sweep(&self, now: SystemTime) {
        self.graph.write().sweep(now, PATTERN_SWEEP_STALE_EDGE_SECS);
        self.patterns.write().sweep(PATTERN_SWEEP_DECAY);
        self.clients.write().retain(|_, profile| !profile.lock().is_stale(now));
    }

    pub fn stats(&self) -> Stats {
        Stats {
            edges: self.graph.read().edge_count(),
            clients: self.clients.read().len(),
            predictions_emitted: self.predictions_emitted.load(std::sync::atomic::Ordering::Relaxed),
            prefetches: self.prefetches.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn client_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    }

    #[test]
    fn repeated_companion_queries_produce_a_high_confidence_prediction() {
        let predictor = Predictor::new(true);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let web = ServiceRef::new("default", "web");
        let auth = ServiceRef::new("default", "auth");

        for i in 0..10 {
            let t = t0 + Duration::from_secs(i * 120);
            predictor.observe(client_ip(), web.clone(), QueryType::A, t);
            predictor.observe(client_ip(), auth.clone(), QueryType::A, t + Duration::from_secs(1));
        }

        let last = t0 + Duration::from_secs(9 * 120);
        let predictions = predictor.predict(client_ip(), &web, last);
        assert!(predictions.iter().any(|p| p.service == auth));
    }

    #[test]
    fn disabled_predictor_never_emits_predictions() {
        let predictor = Predictor::new(false);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let web = ServiceRef::new("default", "web");
        predictor.observe(client_ip(), web.clone(), QueryType::A, t0);
        assert!(predictor.predict(client_ip(), &web, t0).is_empty());
    }

    #[test]
    fn prefetch_candidates_respect_the_priority_threshold() {
        let predictor = Predictor::new(true);
        let weak = ScoredService { service: ServiceRef::new("default", "widgets"), score: 0.05 };
        let candidates = predictor.prefetch_candidates(vec![weak], QueryType::A);
        assert!(candidates.is_empty());
    }

    #[test]
    fn sweep_evicts_inactive_clients() {
        let predictor = Predictor::new(true);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        predictor.observe(client_ip(), ServiceRef::new("default", "web"), QueryType::A, t0);
        assert_eq!(predictor.stats().clients, 1);

        predictor.sweep(t0 + Duration::from_secs(10_000));
        assert_eq!(predictor.stats().clients, 0);
    }
}
