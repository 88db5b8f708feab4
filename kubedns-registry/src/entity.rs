use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    IPv4,
    IPv6,
}

impl IpFamily {
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::IPv4,
            IpAddr::V6(_) => IpFamily::IPv6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    TCP,
    UDP,
    SCTP,
}

impl Protocol {
    /// Case-insensitive match against the `_<proto>` SRV label.
    pub fn matches_label(&self, label: &str) -> bool {
        let name = match self {
            Protocol::TCP => "tcp",
            Protocol::UDP => "udp",
            Protocol::SCTP => "sctp",
        };
        label.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// A Kubernetes Service, identified by (namespace, name).
///
/// Invariants: `ip_families`, if non-empty, is parallel to
/// `cluster_ips`; a headless service has no cluster IPs; an
/// `ExternalName` service has no cluster IPs and no ports but a
/// non-empty `external_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub service_type: ServiceType,
    pub cluster_ips: Vec<IpAddr>,
    pub ip_families: Vec<IpFamily>,
    pub external_name: Option<String>,
    pub headless: bool,
    pub ports: Vec<Port>,
}

impl Service {
    pub fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    pub fn storage_key(&self) -> String {
        Self::key(&self.namespace, &self.name)
    }

    /// First cluster IP of the given family, if any.
    pub fn cluster_ip(&self, family: IpFamily) -> Option<IpAddr> {
        if self.ip_families.is_empty() {
            // No family list: classify cluster IPs by address length.
            return self.cluster_ips.iter().copied().find(|ip| IpFamily::of(*ip) == family);
        }
        self.cluster_ips
            .iter()
            .zip(self.ip_families.iter())
            .find(|(_, fam)| **fam == family)
            .map(|(ip, _)| *ip)
    }

    pub fn port_named(&self, name: &str, protocol_label: &str) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.name == name && p.protocol.matches_label(protocol_label))
    }
}

/// A single endpoint within an Endpoint set.
///
/// Invariant: endpoints with an empty address list are discarded on
/// ingest — enforced by the registry's `set_endpoints`, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub addresses: Vec<IpAddr>,
    pub hostname: Option<String>,
    pub ready: bool,
    pub target_ref: Option<TargetRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// A Kubernetes Pod, identified by (namespace, name).
///
/// Invariant: a pod with no IPs is not stored — enforced by the
/// registry's `add_pod`, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub ips: Vec<IpAddr>,
    pub hostname: Option<String>,
    pub subdomain: Option<String>,
}

impl Pod {
    pub fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    pub fn storage_key(&self) -> String {
        Self::key(&self.namespace, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_ip_prefers_family_list_over_length_guess() {
        let svc = Service {
            namespace: "default".into(),
            name: "web".into(),
            service_type: ServiceType::ClusterIP,
            cluster_ips: vec!["10.0.0.1".parse().unwrap(), "2001:db8::1".parse().unwrap()],
            ip_families: vec![IpFamily::IPv4, IpFamily::IPv6],
            external_name: None,
            headless: false,
            ports: vec![],
        };
        assert_eq!(svc.cluster_ip(IpFamily::IPv4), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(svc.cluster_ip(IpFamily::IPv6), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn srv_protocol_match_is_case_insensitive() {
        let port = Port {
            name: "https".into(),
            port: 443,
            protocol: Protocol::TCP,
        };
        assert!(port.protocol.matches_label("TCP"));
        assert!(port.protocol.matches_label("tcp"));
        assert!(!port.protocol.matches_label("udp"));
    }
}
