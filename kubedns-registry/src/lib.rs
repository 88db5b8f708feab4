//! In-memory service/pod/endpoint registry, continuously synchronized
//! from the Kubernetes API by `kubedns-watch`.
//!
//! Two implementations share the [`Registry`] contract: [`standard::StandardRegistry`]
//! (three `RwLock<HashMap>`s) for the straightforward profile, and
//! [`sharded::ShardedRegistry`] (256-way sharded) for the high-throughput
//! profile. `kubedns-resolver` consumes either behind `&dyn Registry`.

pub mod entity;
pub mod sharded;
pub mod standard;

use std::net::IpAddr;
use std::sync::Arc;

pub use entity::{Endpoint, IpFamily, Pod, Port, Protocol, Service, ServiceType, TargetRef};

/// Atomic, relaxed-increment counters exposed by both registry
/// implementations; surfaced as-is through the middleware's `Stats()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub services: usize,
    pub pods: usize,
    pub endpoint_sets: usize,
}

pub trait Registry: Send + Sync {
    /// No-op (with a diagnostic) for a nil/empty-name entity.
    fn add_service(&self, service: Service);
    fn delete_service(&self, namespace: &str, name: &str);
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;
    /// Scans all service shards under read locks; returns on first match.
    fn get_service_by_ip(&self, ip: IpAddr) -> Option<Arc<Service>>;

    /// No-op (with a diagnostic) for a nil/empty-name/IP-less pod.
    fn add_pod(&self, pod: Pod);
    fn delete_pod(&self, namespace: &str, name: &str);
    fn get_pod_by_name(&self, namespace: &str, name: &str) -> Option<Arc<Pod>>;
    fn get_pod_by_ip(&self, ip: IpAddr) -> Option<Arc<Pod>>;

    /// Atomic replacement; `endpoints` empty deletes the key.
    fn set_endpoints(&self, namespace: &str, service: &str, endpoints: Vec<Endpoint>);
    fn get_endpoints(&self, namespace: &str, service: &str) -> Option<Arc<Vec<Endpoint>>>;

    fn stats(&self) -> Stats;
}

/// `killer_mode` selects [`sharded::ShardedRegistry`] over
/// [`standard::StandardRegistry`]; both are boxed behind [`Registry`]
/// so callers never see the difference past construction.
#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub killer_mode: bool,
}

impl Config {
    pub fn build(self) -> Arc<dyn Registry> {
        if self.killer_mode {
            Arc::new(sharded::ShardedRegistry::new())
        } else {
            Arc::new(standard::StandardRegistry::new())
        }
    }
}

fn is_usable_service(service: &Service) -> bool {
    !service.namespace.is_empty() && !service.name.is_empty()
}

fn is_usable_pod(pod: &Pod) -> bool {
    !pod.namespace.is_empty() && !pod.name.is_empty() && !pod.ips.is_empty()
}
