use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{Endpoint, Pod, Service};
use crate::{is_usable_pod, is_usable_service, Registry, Stats};

const SHARD_COUNT: usize = 256;

/// `h = 31*h + byte`, as specified for shard selection.
fn hash31(key: &str) -> u64 {
    let mut h: u64 = 0;
    for byte in key.as_bytes() {
        h = h.wrapping_mul(31).wrapping_add(*byte as u64);
    }
    h
}

fn key_shard(key: &str) -> usize {
    (hash31(key) % SHARD_COUNT as u64) as usize
}

fn pod_ip_shard(ip: IpAddr) -> usize {
    match ip {
        IpAddr::V4(addr) => addr.octets()[3] as usize,
        IpAddr::V6(addr) => addr.octets()[15] as usize,
    }
}

fn new_shards<V>() -> Vec<RwLock<HashMap<String, Arc<V>>>> {
    (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect()
}

/// 256 service / 256 pod / 256 endpoint shards, each with its own
/// `RwLock`. Pods are additionally indexed by IP, sharded on the last
/// address octet/byte, for the pod-by-IP resolution path.
pub struct ShardedRegistry {
    services: Vec<RwLock<HashMap<String, Arc<Service>>>>,
    pods: Vec<RwLock<HashMap<String, Arc<Pod>>>>,
    pods_by_ip: Vec<RwLock<HashMap<IpAddr, Arc<Pod>>>>,
    endpoints: Vec<RwLock<HashMap<String, Arc<Vec<Endpoint>>>>>,
}

impl Default for ShardedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedRegistry {
    pub fn new() -> Self {
        Self {
            services: new_shards(),
            pods: new_shards(),
            pods_by_ip: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            endpoints: new_shards(),
        }
    }
}

impl Registry for ShardedRegistry {
    fn add_service(&self, service: Service) {
        if !is_usable_service(&service) {
            tracing::warn!("dropping service with empty namespace/name");
            return;
        }
        let key = service.storage_key();
        let shard = key_shard(&key);
        self.services[shard].write().insert(key, Arc::new(service));
    }

    fn delete_service(&self, namespace: &str, name: &str) {
        let key = Service::key(namespace, name);
        let shard = key_shard(&key);
        self.services[shard].write().remove(&key);
    }

    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        let key = Service::key(namespace, name);
        let shard = key_shard(&key);
        self.services[shard].read().get(&key).cloned()
    }

    fn get_service_by_ip(&self, ip: IpAddr) -> Option<Arc<Service>> {
        for shard in &self.services {
            let guard = shard.read();
            if let Some(found) = guard.values().find(|svc| svc.cluster_ips.contains(&ip)) {
                return Some(found.clone());
            }
        }
        None
    }

    fn add_pod(&self, pod: Pod) {
        if !is_usable_pod(&pod) {
            tracing::warn!("dropping pod with empty namespace/name/ips");
            return;
        }
        let key = pod.storage_key();
        let shard = key_shard(&key);

        // Overwrite-on-update: drop the previous IP index entries
        // before installing the new ones, since they may differ.
        if let Some(previous) = self.pods[shard].read().get(&key).cloned() {
            for ip in &previous.ips {
                let ip_shard = pod_ip_shard(*ip);
                self.pods_by_ip[ip_shard].write().remove(ip);
            }
        }

        let pod = Arc::new(pod);
        for ip in &pod.ips {
            let ip_shard = pod_ip_shard(*ip);
            self.pods_by_ip[ip_shard].write().insert(*ip, pod.clone());
        }
        self.pods[shard].write().insert(key, pod);
    }

    fn delete_pod(&self, namespace: &str, name: &str) {
        let key = Pod::key(namespace, name);
        let shard = key_shard(&key);
        if let Some(removed) = self.pods[shard].write().remove(&key) {
            for ip in &removed.ips {
                let ip_shard = pod_ip_shard(*ip);
                self.pods_by_ip[ip_shard].write().remove(ip);
            }
        }
    }

    fn get_pod_by_name(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        let key = Pod::key(namespace, name);
        let shard = key_shard(&key);
        self.pods[shard].read().get(&key).cloned()
    }

    fn get_pod_by_ip(&self, ip: IpAddr) -> Option<Arc<Pod>> {
        let shard = pod_ip_shard(ip);
        self.pods_by_ip[shard].read().get(&ip).cloned()
    }

    fn set_endpoints(&self, namespace: &str, service: &str, endpoints: Vec<Endpoint>) {
        let key = Service::key(namespace, service);
        let shard = key_shard(&key);
        let endpoints: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|ep| !ep.addresses.is_empty())
            .collect();
        if endpoints.is_empty() {
            self.endpoints[shard].write().remove(&key);
        } else {
            self.endpoints[shard].write().insert(key, Arc::new(endpoints));
        }
    }

    fn get_endpoints(&self, namespace: &str, service: &str) -> Option<Arc<Vec<Endpoint>>> {
        let key = Service::key(namespace, service);
        let shard = key_shard(&key);
        self.endpoints[shard].read().get(&key).cloned()
    }

    fn stats(&self) -> Stats {
        Stats {
            services: self.services.iter().map(|s| s.read().len()).sum(),
            pods: self.pods.iter().map(|s| s.read().len()).sum(),
            endpoint_sets: self.endpoints.iter().map(|s| s.read().len()).sum(),
        }
    }
}
