//! Pure qname → query-kind classification. Does not touch the
//! registry; the StatefulSet-pod vs. "unrecognized" tie-break that
//! needs a registry lookup happens one layer up, in `resolve()`.

use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Service {
        namespace: String,
        name: String,
    },
    Srv {
        port: String,
        proto: String,
        namespace: String,
        name: String,
    },
    /// `<pod>.<svc>.<ns>.svc.<cd>.` — only ever a candidate: `resolve()`
    /// still has to confirm `<pod>` isn't a name-encoded IP and that
    /// either an endpoint or a pod matches.
    PodCandidate {
        pod: String,
        namespace: String,
        name: String,
    },
    PodByIp {
        ip_label: String,
        namespace: String,
    },
    Ptr {
        ip: IpAddr,
    },
}

/// `qname` must already be lowercased and dot-terminated. Returns
/// `None` both for non-cluster domains and for malformed
/// within-domain names (unexpected label count) — both cases mean
/// "not our domain; pass through" per the error handling policy.
pub fn classify(qname: &str, cluster_domain: &str) -> Option<Query> {
    if let Some(ip) = kubedns_addr::parse_reverse_name(qname) {
        return Some(Query::Ptr { ip });
    }

    let suffix = format!(".{cluster_domain}.");
    let prefix = qname.strip_suffix(&suffix)?;
    if prefix.is_empty() {
        return None;
    }
    let labels: Vec<&str> = prefix.split('.').collect();

    if let [ip_label, ns, kind] = labels.as_slice() {
        if *kind == "pod" {
            return Some(Query::PodByIp {
                ip_label: ip_label.to_string(),
                namespace: ns.to_string(),
            });
        }
    }

    if let [svc, ns, kind] = labels.as_slice() {
        if *kind == "svc" {
            return Some(Query::Service {
                namespace: ns.to_string(),
                name: svc.to_string(),
            });
        }
    }

    if let [port, proto, svc, ns, kind] = labels.as_slice() {
        if *kind == "svc" {
            if let (Some(port), Some(proto)) =
                (port.strip_prefix('_'), proto.strip_prefix('_'))
            {
                return Some(Query::Srv {
                    port: port.to_string(),
                    proto: proto.to_string(),
                    namespace: ns.to_string(),
                    name: svc.to_string(),
                });
            }
        }
    }

    if let [pod, svc, ns, kind] = labels.as_slice() {
        if *kind == "svc" {
            return Some(Query::PodCandidate {
                pod: pod.to_string(),
                namespace: ns.to_string(),
                name: svc.to_string(),
            });
        }
    }

    None
}
