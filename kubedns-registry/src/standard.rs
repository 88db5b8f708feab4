use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{Endpoint, Pod, Service};
use crate::{is_usable_pod, is_usable_service, Registry, Stats};

/// Three `RwLock<HashMap>`s — the straightforward profile's registry.
/// Correct and simple; `ShardedRegistry` trades this for throughput
/// under contention.
#[derive(Default)]
pub struct StandardRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
    pods: RwLock<HashMap<String, Arc<Pod>>>,
    pods_by_ip: RwLock<HashMap<IpAddr, Arc<Pod>>>,
    endpoints: RwLock<HashMap<String, Arc<Vec<Endpoint>>>>,
}

impl StandardRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for StandardRegistry {
    fn add_service(&self, service: Service) {
        if !is_usable_service(&service) {
            tracing::warn!("dropping service with empty namespace/name");
            return;
        }
        self.services
            .write()
            .insert(service.storage_key(), Arc::new(service));
    }

    fn delete_service(&self, namespace: &str, name: &str) {
        self.services.write().remove(&Service::key(namespace, name));
    }

    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services.read().get(&Service::key(namespace, name)).cloned()
    }

    fn get_service_by_ip(&self, ip: IpAddr) -> Option<Arc<Service>> {
        self.services
            .read()
            .values()
            .find(|svc| svc.cluster_ips.contains(&ip))
            .cloned()
    }

    fn add_pod(&self, pod: Pod) {
        if !is_usable_pod(&pod) {
            tracing::warn!("dropping pod with empty namespace/name/ips");
            return;
        }
        let key = pod.storage_key();

        if let Some(previous) = self.pods.read().get(&key).cloned() {
            let mut by_ip = self.pods_by_ip.write();
            for ip in &previous.ips {
                by_ip.remove(ip);
            }
        }

        let pod = Arc::new(pod);
        {
            let mut by_ip = self.pods_by_ip.write();
            for ip in &pod.ips {
                by_ip.insert(*ip, pod.clone());
            }
        }
        self.pods.write().insert(key, pod);
    }

    fn delete_pod(&self, namespace: &str, name: &str) {
        if let Some(removed) = self.pods.write().remove(&Pod::key(namespace, name)) {
            let mut by_ip = self.pods_by_ip.write();
            for ip in &removed.ips {
                by_ip.remove(ip);
            }
        }
    }

    fn get_pod_by_name(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.pods.read().get(&Pod::key(namespace, name)).cloned()
    }

    fn get_pod_by_ip(&self, ip: IpAddr) -> Option<Arc<Pod>> {
        self.pods_by_ip.read().get(&ip).cloned()
    }

    fn set_endpoints(&self, namespace: &str, service: &str, endpoints: Vec<Endpoint>) {
        let key = Service::key(namespace, service);
        let endpoints: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|ep| !ep.addresses.is_empty())
            .collect();
        if endpoints.is_empty() {
            self.endpoints.write().remove(&key);
        } else {
            self.endpoints.write().insert(key, Arc::new(endpoints));
        }
    }

    fn get_endpoints(&self, namespace: &str, service: &str) -> Option<Arc<Vec<Endpoint>>> {
        self.endpoints.read().get(&Service::key(namespace, service)).cloned()
    }

    fn stats(&self) -> Stats {
        Stats {
            services: self.services.read().len(),
            pods: self.pods.read().len(),
            endpoint_sets: self.endpoints.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{IpFamily, ServiceType};

    #[test]
    fn add_get_delete_pod_round_trips() {
        let registry = StandardRegistry::new();
        registry.add_pod(Pod {
            namespace: "default".into(),
            name: "web-0".into(),
            ips: vec!["10.244.1.1".parse().unwrap()],
            hostname: None,
            subdomain: Some("web".into()),
        });

        assert!(registry.get_pod_by_name("default", "web-0").is_some());
        assert!(registry.get_pod_by_ip("10.244.1.1".parse().unwrap()).is_some());

        registry.delete_pod("default", "web-0");
        assert!(registry.get_pod_by_name("default", "web-0").is_none());
        assert!(registry.get_pod_by_ip("10.244.1.1".parse().unwrap()).is_none());
    }

    #[test]
    fn a_nil_ip_less_pod_is_a_silent_no_op() {
        let registry = StandardRegistry::new();
        registry.add_pod(Pod {
            namespace: "default".into(),
            name: "no-ip".into(),
            ips: vec![],
            hostname: None,
            subdomain: None,
        });
        let stats = registry.stats();
        assert_eq!(stats.pods, 0);
    }

    #[test]
    fn stats_reflect_registry_contents() {
        let registry = StandardRegistry::new();
        registry.add_service(Service {
            namespace: "default".into(),
            name: "web".into(),
            service_type: ServiceType::ClusterIP,
            cluster_ips: vec!["10.0.0.1".parse().unwrap()],
            ip_families: vec![IpFamily::IPv4],
            external_name: None,
            headless: false,
            ports: vec![],
        });
        registry.set_endpoints(
            "default",
            "web",
            vec![Endpoint {
                addresses: vec!["10.1.1.1".parse().unwrap()],
                hostname: None,
                ready: true,
                target_ref: None,
            }],
        );

        let stats = registry.stats();
        assert_eq!(stats.services, 1);
        assert_eq!(stats.endpoint_sets, 1);
    }
}
