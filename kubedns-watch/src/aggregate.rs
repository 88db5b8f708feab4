use std::collections::HashMap;

use kubedns_registry::{Endpoint, Registry};

/// Unions endpoints across every EndpointSlice known for a service
/// before publishing to the registry, rather than the reference's
/// replace-per-slice semantics (a service fanned out over more than
/// one slice would otherwise only ever expose its most recently
/// updated slice).
#[derive(Default)]
pub struct SliceAggregator {
    by_service: HashMap<(String, String), HashMap<String, Vec<Endpoint>>>,
}

impl SliceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_slice(
        &mut self,
        registry: &dyn Registry,
        namespace: &str,
        service: &str,
        slice_name: &str,
        endpoints: Vec<Endpoint>,
    ) {
        let key = (namespace.to_string(), service.to_string());
        self.by_service
            .entry(key.clone())
            .or_default()
            .insert(slice_name.to_string(), endpoints);
        self.publish(registry, &key);
    }

    pub fn remove_slice(&mut self, registry: &dyn Registry, namespace: &str, service: &str, slice_name: &str) {
        let key = (namespace.to_string(), service.to_string());
        if let Some(slices) = self.by_service.get_mut(&key) {
            slices.remove(slice_name);
        }
        self.publish(registry, &key);
    }

    fn publish(&self, registry: &dyn Registry, key: &(String, String)) {
        let union: Vec<Endpoint> = self
            .by_service
            .get(key)
            .map(|slices| slices.values().flatten().cloned().collect())
            .unwrap_or_default();
        registry.set_endpoints(&key.0, &key.1, union);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubedns_registry::sharded::ShardedRegistry;

    fn endpoint(addr: &str) -> Endpoint {
        Endpoint {
            addresses: vec![addr.parse().unwrap()],
            hostname: None,
            ready: true,
            target_ref: None,
        }
    }

    #[test]
    fn endpoints_from_two_slices_are_unioned() {
        let registry = ShardedRegistry::new();
        let mut aggregator = SliceAggregator::new();

        aggregator.apply_slice(&registry, "default", "web", "web-aaaaa", vec![endpoint("10.0.0.1")]);
        aggregator.apply_slice(&registry, "default", "web", "web-bbbbb", vec![endpoint("10.0.0.2")]);

        let endpoints = registry.get_endpoints("default", "web").unwrap();
        assert_eq!(endpoints.len(), 2);
    }

    #[test]
    fn removing_one_slice_keeps_the_other() {
        let registry = ShardedRegistry::new();
        let mut aggregator = SliceAggregator::new();

        aggregator.apply_slice(&registry, "default", "web", "web-aaaaa", vec![endpoint("10.0.0.1")]);
        aggregator.apply_slice(&registry, "default", "web", "web-bbbbb", vec![endpoint("10.0.0.2")]);
        aggregator.remove_slice(&registry, "default", "web", "web-aaaaa");

        let endpoints = registry.get_endpoints("default", "web").unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].addresses[0].to_string(), "10.0.0.2");
    }
}
