//! Translates Kubernetes API objects into registry entities. Every
//! function returns `None` on a payload too malformed to use rather
//! than panicking — the watch loop discards these with a diagnostic.

use k8s_openapi::api::core::v1::{Pod as K8sPod, Service as K8sService};
use k8s_openapi::api::discovery::v1::EndpointSlice as K8sEndpointSlice;

use kubedns_registry::{Endpoint, IpFamily, Pod, Port, Protocol, Service, ServiceType, TargetRef};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

fn parse_protocol(label: Option<&str>) -> Protocol {
    match label.map(str::to_ascii_uppercase).as_deref() {
        Some("UDP") => Protocol::UDP,
        Some("SCTP") => Protocol::SCTP,
        _ => Protocol::TCP,
    }
}

pub fn to_service(svc: &K8sService) -> Option<Service> {
    let namespace = svc.metadata.namespace.clone()?;
    let name = svc.metadata.name.clone()?;
    let spec = svc.spec.as_ref()?;

    let service_type = match spec.type_.as_deref() {
        Some("NodePort") => ServiceType::NodePort,
        Some("LoadBalancer") => ServiceType::LoadBalancer,
        Some("ExternalName") => ServiceType::ExternalName,
        _ => ServiceType::ClusterIP,
    };

    let cluster_ip = spec.cluster_ip.as_deref();
    let headless = cluster_ip == Some("None");

    let mut cluster_ips = Vec::new();
    let mut ip_families = Vec::new();
    if !headless {
        let raw_ips = spec
            .cluster_ips
            .clone()
            .filter(|ips| !ips.is_empty())
            .or_else(|| cluster_ip.filter(|ip| !ip.is_empty()).map(|ip| vec![ip.to_string()]));
        for raw in raw_ips.into_iter().flatten() {
            if let Ok(addr) = raw.parse() {
                ip_families.push(IpFamily::of(addr));
                cluster_ips.push(addr);
            }
        }
    }

    let ports = spec
        .ports
        .iter()
        .flatten()
        .map(|p| Port {
            name: p.name.clone().unwrap_or_default(),
            port: p.port.max(0) as u16,
            protocol: parse_protocol(p.protocol.as_deref()),
        })
        .collect();

    Some(Service {
        namespace,
        name,
        service_type,
        cluster_ips,
        ip_families,
        external_name: spec.external_name.clone(),
        headless,
        ports,
    })
}

pub fn to_pod(pod: &K8sPod) -> Option<Pod> {
    let namespace = pod.metadata.namespace.clone()?;
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref()?;

    let mut ips = Vec::new();
    for entry in status.pod_ips.iter().flatten() {
        if let Ok(addr) = entry.ip.parse() {
            if !ips.contains(&addr) {
                ips.push(addr);
            }
        }
    }
    if ips.is_empty() {
        if let Some(addr) = status.pod_ip.as_deref().and_then(|ip| ip.parse().ok()) {
            ips.push(addr);
        }
    }
    if ips.is_empty() {
        return None;
    }

    let spec = pod.spec.as_ref();
    Some(Pod {
        namespace,
        name,
        ips,
        hostname: spec.and_then(|s| s.hostname.clone()),
        subdomain: spec.and_then(|s| s.subdomain.clone()),
    })
}

/// Returns `(namespace, service_name, endpoints)` for one slice, or
/// `None` when it carries no `kubernetes.io/service-name` label.
pub fn to_endpoints(slice: &K8sEndpointSlice) -> Option<(String, String, Vec<Endpoint>)> {
    let namespace = slice.metadata.namespace.clone()?;
    let service_name = slice.metadata.labels.as_ref()?.get(SERVICE_NAME_LABEL)?.clone();

    let endpoints = slice
        .endpoints
        .iter()
        .filter_map(|ep| {
            let addresses: Vec<_> = ep.addresses.iter().filter_map(|a| a.parse().ok()).collect();
            if addresses.is_empty() {
                return None;
            }
            let ready = ep.conditions.as_ref().and_then(|c| c.ready).unwrap_or(true);
            let target_ref = ep.target_ref.as_ref().map(|t| TargetRef {
                kind: t.kind.clone().unwrap_or_default(),
                name: t.name.clone().unwrap_or_default(),
                namespace: t.namespace.clone().unwrap_or_default(),
            });
            Some(Endpoint {
                addresses,
                hostname: ep.hostname.clone(),
                ready,
                target_ref,
            })
        })
        .collect();

    Some((namespace, service_name, endpoints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodIP, PodSpec, PodStatus, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn headless_service_has_no_cluster_ips() {
        let svc = K8sService {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some("web".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".into()),
                ports: Some(vec![ServicePort {
                    name: Some("http".into()),
                    port: 80,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        };

        let converted = to_service(&svc).unwrap();
        assert!(converted.headless);
        assert!(converted.cluster_ips.is_empty());
        assert_eq!(converted.ports[0].port, 80);
    }

    #[test]
    fn pod_prefers_dual_stack_list_over_primary_ip() {
        let pod = K8sPod {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some("web-0".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                hostname: Some("web-0".into()),
                subdomain: Some("web".into()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.5".into()),
                pod_ips: Some(vec![
                    PodIP { ip: "10.0.0.5".into() },
                    PodIP { ip: "fd00::5".into() },
                ]),
                ..Default::default()
            }),
        };

        let converted = to_pod(&pod).unwrap();
        assert_eq!(converted.ips.len(), 2);
        assert_eq!(converted.hostname.as_deref(), Some("web-0"));
    }

    #[test]
    fn pod_with_no_ip_is_discarded() {
        let pod = K8sPod {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some("pending".into()),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus::default()),
        };
        assert!(to_pod(&pod).is_none());
    }

    #[test]
    fn endpoint_slice_without_service_label_is_discarded() {
        let slice = K8sEndpointSlice {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some("web-abcde".into()),
                labels: Some(BTreeMap::new()),
                ..Default::default()
            },
            address_type: "IPv4".into(),
            endpoints: vec![],
            ports: None,
        };
        assert!(to_endpoints(&slice).is_none());
    }
}
