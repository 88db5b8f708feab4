use std::collections::HashMap;

use crate::ServiceRef;

const CONTRIBUTION: f64 = 0.1;

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Per-namespace co-occurrence graph over service base names.
/// Contributions accumulate but are clamped to 1.0 per pair.
#[derive(Default)]
pub struct NamespaceCorrelation {
    correlations: HashMap<String, HashMap<(String, String), f64>>,
}

impl NamespaceCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_together(&mut self, namespace: &str, a: &ServiceRef, b: &ServiceRef) {
        if a.base_name() == b.base_name() {
            return;
        }
        let bucket = self.correlations.entry(namespace.to_string()).or_default();
        let key = pair_key(a.base_name(), b.base_name());
        let weight = bucket.entry(key).or_insert(0.0);
        *weight = (*weight + CONTRIBUTION).min(1.0);
    }

    pub fn score(&self, namespace: &str, a: &ServiceRef, b: &ServiceRef) -> f64 {
        self.correlations
            .get(namespace)
            .and_then(|bucket| bucket.get(&pair_key(a.base_name(), b.base_name())))
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(ns: &str, name: &str) -> ServiceRef {
        ServiceRef::new(ns, name)
    }

    #[test]
    fn correlation_is_symmetric_and_clamped() {
        let mut corr = NamespaceCorrelation::new();
        for _ in 0..20 {
            corr.observe_together("default", &svc("default", "web"), &svc("default", "auth"));
        }
        assert_eq!(corr.score("default", &svc("default", "web"), &svc("default", "auth")), 1.0);
        assert_eq!(corr.score("default", &svc("default", "auth"), &svc("default", "web")), 1.0);
    }

    #[test]
    fn unrelated_namespace_has_no_correlation() {
        let mut corr = NamespaceCorrelation::new();
        corr.observe_together("default", &svc("default", "web"), &svc("default", "auth"));
        assert_eq!(corr.score("kube-system", &svc("kube-system", "web"), &svc("kube-system", "auth")), 0.0);
    }
}
