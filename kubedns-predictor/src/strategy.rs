use kubedns_proto::packet::QueryType;

use crate::ServiceRef;

const IMPORTANCE_KEYWORDS: &[&str] = &[
    "kube-dns",
    "coredns",
    "auth",
    "api-gateway",
    "ingress",
    "istio",
    "linkerd",
    "database",
    "cache",
];
const IMPORTANCE_BOOST: f64 = 1.5;
const PREFETCH_THRESHOLD: f64 = 0.3;

fn is_important(service: &ServiceRef) -> bool {
    IMPORTANCE_KEYWORDS.iter().any(|kw| service.name.contains(kw))
}

/// Record types to warm for a given query type on the current query,
/// per the fixed lookup table.
pub fn record_types_for(current_qtype: QueryType) -> Vec<QueryType> {
    match current_qtype {
        QueryType::A => vec![QueryType::A, QueryType::AAAA],
        QueryType::AAAA => vec![QueryType::AAAA, QueryType::A],
        QueryType::SRV => vec![QueryType::A, QueryType::AAAA],
        _ => vec![QueryType::A, QueryType::AAAA],
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchCandidate {
    pub service: ServiceRef,
    pub qtypes: Vec<QueryType>,
    pub priority: f64,
}

/// Turns a ranked prediction into an actionable prefetch candidate.
pub struct PrefetchStrategy;

impl PrefetchStrategy {
    /// Applies the service-importance boost and the priority floor.
    /// Returns `None` when the candidate doesn't clear the threshold.
    pub fn evaluate(service: ServiceRef, score: f64, current_qtype: QueryType) -> Option<PrefetchCandidate> {
        let importance = if is_important(&service) { IMPORTANCE_BOOST } else { 1.0 };
        let priority = score * importance;
        if priority < PREFETCH_THRESHOLD {
            return None;
        }
        Some(PrefetchCandidate {
            service,
            qtypes: record_types_for(current_qtype),
            priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boosted_important_service_clears_threshold_below_base_score() {
        let svc = ServiceRef::new("default", "auth-service");
        let candidate = PrefetchStrategy::evaluate(svc, 0.21, QueryType::A).unwrap();
        assert!((candidate.priority - 0.315).abs() < 1e-9);
    }

    #[test]
    fn unimportant_low_score_is_dropped() {
        let svc = ServiceRef::new("default", "widgets");
        assert!(PrefetchStrategy::evaluate(svc, 0.2, QueryType::A).is_none());
    }

    #[test]
    fn record_types_follow_the_qtype_table() {
        assert_eq!(record_types_for(QueryType::A), vec![QueryType::A, QueryType::AAAA]);
        assert_eq!(record_types_for(QueryType::AAAA), vec![QueryType::AAAA, QueryType::A]);
        assert_eq!(record_types_for(QueryType::SRV), vec![QueryType::A, QueryType::AAAA]);
    }
}
