//! Query classification and RR synthesis against an in-memory
//! [`Registry`]. This is the "parse→classify→lookup→synthesize" stage;
//! wire parsing happens upstream in the middleware, wire packing
//! happens downstream.

pub mod classify;

use std::net::IpAddr;

use kubedns_proto::packet::header::ResponseCode;
use kubedns_proto::packet::record::Record;
use kubedns_proto::packet::QueryType;
use kubedns_registry::{Endpoint, IpFamily, Pod, Registry, Service, ServiceType};

pub use classify::{classify, Query};

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct TtlConfig {
    #[serde(default = "TtlConfig::default_ttl")]
    pub service: u32,
    #[serde(default = "TtlConfig::default_ttl")]
    pub pod: u32,
    #[serde(default = "TtlConfig::default_ttl")]
    pub srv: u32,
    #[serde(default = "TtlConfig::default_ttl")]
    pub ptr: u32,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            service: Self::default_ttl(),
            pod: Self::default_ttl(),
            srv: Self::default_ttl(),
            ptr: Self::default_ttl(),
        }
    }
}

impl TtlConfig {
    fn default_ttl() -> u32 {
        30
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cluster_domain: String,
    pub ttl: TtlConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cluster_domain: "cluster.local".into(),
            ttl: TtlConfig::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Answer {
    pub records: Vec<Record>,
    pub extra: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub rcode: ResponseCode,
    pub answer: Answer,
    /// `false` means "not our domain; pass through" — the caller must
    /// not write a response in that case.
    pub handled: bool,
}

impl Resolution {
    fn not_handled() -> Self {
        Self {
            rcode: ResponseCode::NoError,
            answer: Answer::default(),
            handled: false,
        }
    }

    fn nxdomain() -> Self {
        Self {
            rcode: ResponseCode::NameError,
            answer: Answer::default(),
            handled: true,
        }
    }

    fn success(answer: Answer) -> Self {
        Self {
            rcode: ResponseCode::NoError,
            answer,
            handled: true,
        }
    }
}

/// Classify `qname`, dispatch to `registry`, and synthesize the
/// answer. `qname` must already be lowercased and dot-terminated.
pub fn resolve(
    registry: &dyn Registry,
    qname: &str,
    qtype: QueryType,
    cfg: &ResolverConfig,
) -> Resolution {
    let query = match classify(qname, &cfg.cluster_domain) {
        Some(query) => query,
        None => return Resolution::not_handled(),
    };

    match query {
        Query::Service { namespace, name } => resolve_service(registry, &namespace, &name, qtype, cfg),
        Query::Srv {
            port,
            proto,
            namespace,
            name,
        } => resolve_srv(registry, &namespace, &name, &port, &proto, cfg),
        Query::PodCandidate {
            pod,
            namespace,
            name,
        } => resolve_statefulset_pod(registry, &namespace, &name, &pod, qtype, cfg),
        Query::PodByIp { ip_label, namespace } => {
            resolve_pod_by_ip(registry, &namespace, &ip_label, qtype, cfg)
        }
        Query::Ptr { ip } => resolve_ptr(registry, ip, cfg),
    }
}

fn resolve_service(
    registry: &dyn Registry,
    namespace: &str,
    name: &str,
    qtype: QueryType,
    cfg: &ResolverConfig,
) -> Resolution {
    let service = match registry.get_service(namespace, name) {
        Some(service) => service,
        None => return Resolution::nxdomain(),
    };

    if service.headless {
        return resolve_headless_service(registry, &service, qtype, cfg);
    }

    if service.service_type == ServiceType::ExternalName
        && matches!(qtype, QueryType::CNAME | QueryType::Unknown(255))
    {
        if let Some(target) = &service.external_name {
            let target = dot_terminated(target);
            return Resolution::success(Answer {
                records: vec![Record::CNAME {
                    domain: full_service_name(namespace, name, &cfg.cluster_domain),
                    host: target,
                    ttl: cfg.ttl.service,
                }],
                extra: vec![],
            });
        }
        return Resolution::success(Answer::default());
    }

    let mut records = Vec::new();
    let want_a = matches!(qtype, QueryType::A | QueryType::Unknown(255));
    let want_aaaa = matches!(qtype, QueryType::AAAA | QueryType::Unknown(255));

    if want_a {
        if let Some(IpAddr::V4(addr)) = service.cluster_ip(IpFamily::IPv4) {
            records.push(Record::A {
                domain: full_service_name(namespace, name, &cfg.cluster_domain),
                addr,
                ttl: cfg.ttl.service,
            });
        }
    }
    if want_aaaa {
        if let Some(IpAddr::V6(addr)) = service.cluster_ip(IpFamily::IPv6) {
            records.push(Record::AAAA {
                domain: full_service_name(namespace, name, &cfg.cluster_domain),
                addr,
                ttl: cfg.ttl.service,
            });
        }
    }

    Resolution::success(Answer {
        records,
        extra: vec![],
    })
}

fn resolve_headless_service(
    registry: &dyn Registry,
    service: &Service,
    qtype: QueryType,
    cfg: &ResolverConfig,
) -> Resolution {
    let domain = full_service_name(&service.namespace, &service.name, &cfg.cluster_domain);
    let endpoints = registry
        .get_endpoints(&service.namespace, &service.name)
        .map(|eps| (*eps).clone())
        .unwrap_or_default();

    let want_a = matches!(qtype, QueryType::A | QueryType::Unknown(255));
    let want_aaaa = matches!(qtype, QueryType::AAAA | QueryType::Unknown(255));

    let mut records = Vec::new();
    for endpoint in endpoints.iter().filter(|ep| ep.ready) {
        for addr in &endpoint.addresses {
            match addr {
                IpAddr::V4(v4) if want_a => records.push(Record::A {
                    domain: domain.clone(),
                    addr: *v4,
                    ttl: cfg.ttl.service,
                }),
                IpAddr::V6(v6) if want_aaaa => records.push(Record::AAAA {
                    domain: domain.clone(),
                    addr: *v6,
                    ttl: cfg.ttl.service,
                }),
                _ => {}
            }
        }
    }

    // Empty answer is success, not NXDOMAIN: the service exists, it
    // simply has no record of the requested family.
    Resolution::success(Answer {
        records,
        extra: vec![],
    })
}

fn resolve_srv(
    registry: &dyn Registry,
    namespace: &str,
    name: &str,
    port_label: &str,
    proto_label: &str,
    cfg: &ResolverConfig,
) -> Resolution {
    let service = match registry.get_service(namespace, name) {
        Some(service) => service,
        None => return Resolution::nxdomain(),
    };

    let port = match service.port_named(port_label, proto_label) {
        Some(port) => port,
        None => return Resolution::nxdomain(),
    };

    let target = full_service_name(namespace, name, &cfg.cluster_domain);
    let weight = if service.ports.len() > 1 { 1 } else { 100 };

    let mut extra = Vec::new();
    if !service.headless {
        if let Some(IpAddr::V4(addr)) = service.cluster_ip(IpFamily::IPv4) {
            extra.push(Record::A {
                domain: target.clone(),
                addr,
                ttl: cfg.ttl.service,
            });
        }
        if let Some(IpAddr::V6(addr)) = service.cluster_ip(IpFamily::IPv6) {
            extra.push(Record::AAAA {
                domain: target.clone(),
                addr,
                ttl: cfg.ttl.service,
            });
        }
    }

    Resolution::success(Answer {
        records: vec![Record::SRV {
            domain: srv_name(namespace, name, port_label, proto_label, &cfg.cluster_domain),
            priority: 0,
            weight,
            port: port.port,
            target,
            ttl: cfg.ttl.srv,
        }],
        extra,
    })
}

fn resolve_pod_by_ip(
    registry: &dyn Registry,
    namespace: &str,
    ip_label: &str,
    qtype: QueryType,
    cfg: &ResolverConfig,
) -> Resolution {
    let ip = match kubedns_addr::decode_pod_label(ip_label) {
        Some(ip) => ip,
        // Unparseable pod-name IP is a malformed query: pass through.
        None => return Resolution::not_handled(),
    };

    let pod = match registry.get_pod_by_ip(ip) {
        Some(pod) => pod,
        None => return Resolution::nxdomain(),
    };
    if pod.namespace != namespace {
        return Resolution::nxdomain();
    }

    pod_answer(&pod, ip_label, namespace, qtype, cfg)
}

fn resolve_statefulset_pod(
    registry: &dyn Registry,
    namespace: &str,
    service_name: &str,
    pod_label: &str,
    qtype: QueryType,
    cfg: &ResolverConfig,
) -> Resolution {
    if kubedns_addr::decode_pod_label(pod_label).is_some() {
        // A name-encoded IP in this position is never a StatefulSet
        // pod name.
        return Resolution::nxdomain();
    }

    let domain = format!(
        "{pod_label}.{service_name}.{namespace}.svc.{}.",
        cfg.cluster_domain
    );
    let want_a = matches!(qtype, QueryType::A | QueryType::Unknown(255));
    let want_aaaa = matches!(qtype, QueryType::AAAA | QueryType::Unknown(255));

    if let Some(endpoints) = registry.get_endpoints(namespace, service_name) {
        if let Some(endpoint) = endpoints
            .iter()
            .find(|ep| ep.ready && ep.hostname.as_deref() == Some(pod_label))
        {
            let mut records = Vec::new();
            for addr in &endpoint.addresses {
                match addr {
                    IpAddr::V4(v4) if want_a => records.push(Record::A {
                        domain: domain.clone(),
                        addr: *v4,
                        ttl: cfg.ttl.pod,
                    }),
                    IpAddr::V6(v6) if want_aaaa => records.push(Record::AAAA {
                        domain: domain.clone(),
                        addr: *v6,
                        ttl: cfg.ttl.pod,
                    }),
                    _ => {}
                }
            }
            return Resolution::success(Answer {
                records,
                extra: vec![],
            });
        }
    }

    match registry.get_pod_by_name(namespace, pod_label) {
        Some(pod) if pod.subdomain.as_deref() == Some(service_name) => {
            let mut records = Vec::new();
            for addr in &pod.ips {
                match addr {
                    IpAddr::V4(v4) if want_a => records.push(Record::A {
                        domain: domain.clone(),
                        addr: *v4,
                        ttl: cfg.ttl.pod,
                    }),
                    IpAddr::V6(v6) if want_aaaa => records.push(Record::AAAA {
                        domain: domain.clone(),
                        addr: *v6,
                        ttl: cfg.ttl.pod,
                    }),
                    _ => {}
                }
            }
            Resolution::success(Answer {
                records,
                extra: vec![],
            })
        }
        _ => Resolution::nxdomain(),
    }
}

fn pod_answer(
    pod: &Pod,
    ip_label: &str,
    namespace: &str,
    qtype: QueryType,
    cfg: &ResolverConfig,
) -> Resolution {
    let domain = format!("{ip_label}.{namespace}.pod.{}.", cfg.cluster_domain);
    let want_a = matches!(qtype, QueryType::A | QueryType::Unknown(255));
    let want_aaaa = matches!(qtype, QueryType::AAAA | QueryType::Unknown(255));

    let mut records = Vec::new();
    for addr in &pod.ips {
        match addr {
            IpAddr::V4(v4) if want_a => records.push(Record::A {
                domain: domain.clone(),
                addr: *v4,
                ttl: cfg.ttl.pod,
            }),
            IpAddr::V6(v6) if want_aaaa => records.push(Record::AAAA {
                domain: domain.clone(),
                addr: *v6,
                ttl: cfg.ttl.pod,
            }),
            _ => {}
        }
    }
    Resolution::success(Answer {
        records,
        extra: vec![],
    })
}

fn resolve_ptr(registry: &dyn Registry, ip: IpAddr, cfg: &ResolverConfig) -> Resolution {
    if let Some(pod) = registry.get_pod_by_ip(ip) {
        let label = kubedns_addr::encode_pod_label(ip);
        let host = format!("{label}.{}.pod.{}.", pod.namespace, cfg.cluster_domain);
        return Resolution::success(Answer {
            records: vec![Record::PTR {
                domain: kubedns_addr::format_reverse_name(ip),
                host,
                ttl: cfg.ttl.ptr,
            }],
            extra: vec![],
        });
    }

    if let Some(service) = registry.get_service_by_ip(ip) {
        let host = full_service_name(&service.namespace, &service.name, &cfg.cluster_domain);
        return Resolution::success(Answer {
            records: vec![Record::PTR {
                domain: kubedns_addr::format_reverse_name(ip),
                host,
                ttl: cfg.ttl.ptr,
            }],
            extra: vec![],
        });
    }

    Resolution::nxdomain()
}

fn full_service_name(namespace: &str, name: &str, cluster_domain: &str) -> String {
    format!("{name}.{namespace}.svc.{cluster_domain}.")
}

fn srv_name(namespace: &str, name: &str, port: &str, proto: &str, cluster_domain: &str) -> String {
    format!("_{port}._{proto}.{name}.{namespace}.svc.{cluster_domain}.")
}

fn dot_terminated(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}
