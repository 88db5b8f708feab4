//! Pod-name IP encodings and reverse-DNS name parsing for the cluster
//! domain: `web-0.default.pod.cluster.local.` style labels on one side,
//! `in-addr.arpa`/`ip6.arpa` PTR names on the other.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const IN_ADDR_ARPA_SUFFIX: &str = "in-addr.arpa";
pub const IP6_ARPA_SUFFIX: &str = "ip6.arpa";

/// Encode an IP address the way pod-by-IP qnames spell it: IPv4 with
/// dashes instead of dots, IPv6 with dashes instead of colons (`::`
/// becomes `--`).
pub fn encode_pod_label(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(addr) => encode_ipv4(addr),
        IpAddr::V6(addr) => encode_ipv6(addr),
    }
}

pub fn encode_ipv4(addr: Ipv4Addr) -> String {
    let o = addr.octets();
    format!("{}-{}-{}-{}", o[0], o[1], o[2], o[3])
}

/// Full 8-group form with `-` in place of `:`, collapsing the longest
/// run of zero groups to `--` the same way `::` collapses a run of
/// zero groups in the textual representation.
pub fn encode_ipv6(addr: Ipv6Addr) -> String {
    let segments = addr.segments();

    let mut best_start = None;
    let mut best_len = 0usize;
    let mut run_start = None;
    for (idx, seg) in segments.iter().enumerate() {
        if *seg == 0 {
            let start = run_start.get_or_insert(idx);
            let len = idx - *start + 1;
            if len > best_len {
                best_len = len;
                best_start = Some(*start);
            }
        } else {
            run_start = None;
        }
    }

    // A run shorter than 2 groups isn't worth collapsing.
    if best_len < 2 {
        return segments
            .iter()
            .map(|seg| format!("{seg:x}"))
            .collect::<Vec<_>>()
            .join("-");
    }

    let start = best_start.unwrap();
    let end = start + best_len;
    let head: Vec<String> = segments[..start].iter().map(|s| format!("{s:x}")).collect();
    let tail: Vec<String> = segments[end..].iter().map(|s| format!("{s:x}")).collect();

    format!("{}--{}", head.join("-"), tail.join("-"))
}

/// Parse a pod-name IP label back into an address. Accepts the IPv4
/// dash form, the IPv6 full 8-group dash form, and the IPv6
/// compressed `--` form.
pub fn decode_pod_label(label: &str) -> Option<IpAddr> {
    if let Some(addr) = decode_ipv4(label) {
        return Some(IpAddr::V4(addr));
    }
    decode_ipv6(label).map(IpAddr::V6)
}

pub fn decode_ipv4(label: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = label.split('-').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (idx, part) in parts.iter().enumerate() {
        octets[idx] = part.parse().ok()?;
    }
    Some(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
}

pub fn decode_ipv6(label: &str) -> Option<Ipv6Addr> {
    if let Some((head, tail)) = label.split_once("--") {
        let head_groups = parse_hex_groups(head)?;
        let tail_groups = if tail.is_empty() {
            Vec::new()
        } else {
            parse_hex_groups(tail)?
        };
        if head_groups.len() + tail_groups.len() > 8 {
            return None;
        }
        let mut segments = [0u16; 8];
        let zeros = 8 - head_groups.len() - tail_groups.len();
        segments[..head_groups.len()].copy_from_slice(&head_groups);
        segments[head_groups.len() + zeros..].copy_from_slice(&tail_groups);
        return Some(Ipv6Addr::from(segments));
    }

    let groups = parse_hex_groups(label)?;
    if groups.len() != 8 {
        return None;
    }
    let mut segments = [0u16; 8];
    segments.copy_from_slice(&groups);
    Some(Ipv6Addr::from(segments))
}

fn parse_hex_groups(s: &str) -> Option<Vec<u16>> {
    if s.is_empty() {
        return Some(Vec::new());
    }
    s.split('-')
        .map(|part| u16::from_str_radix(part, 16).ok())
        .collect()
}

/// Build the `in-addr.arpa`/`ip6.arpa` PTR qname (dot-terminated) for
/// an IP address.
pub fn format_reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(addr) => {
            let o = addr.octets();
            format!(
                "{}.{}.{}.{}.{}.",
                o[3], o[2], o[1], o[0], IN_ADDR_ARPA_SUFFIX
            )
        }
        IpAddr::V6(addr) => {
            let mut nibbles = String::with_capacity(64);
            for byte in addr.octets().iter().rev() {
                nibbles.push_str(&format!("{:x}.{:x}.", byte & 0x0F, (byte >> 4) & 0x0F));
            }
            format!("{nibbles}{IP6_ARPA_SUFFIX}.")
        }
    }
}

/// Parse a PTR qname (already lowercased, dot-terminated, with a
/// trailing empty label from the final dot already stripped by the
/// caller) back into an IP address.
pub fn parse_reverse_name(qname: &str) -> Option<IpAddr> {
    let qname = qname.trim_end_matches('.');
    if let Some(prefix) = qname.strip_suffix(&format!(".{IN_ADDR_ARPA_SUFFIX}")) {
        let labels: Vec<&str> = prefix.split('.').collect();
        if labels.len() != 4 {
            return None;
        }
        let mut octets = [0u8; 4];
        for (idx, label) in labels.iter().enumerate() {
            octets[3 - idx] = label.parse().ok()?;
        }
        return Some(IpAddr::V4(Ipv4Addr::new(
            octets[0], octets[1], octets[2], octets[3],
        )));
    }

    if let Some(prefix) = qname.strip_suffix(&format!(".{IP6_ARPA_SUFFIX}")) {
        let labels: Vec<&str> = prefix.split('.').collect();
        if labels.len() != 32 {
            return None;
        }
        let mut nibbles = [0u8; 32];
        for (idx, label) in labels.iter().enumerate() {
            if label.len() != 1 {
                return None;
            }
            nibbles[31 - idx] = u8::from_str_radix(label, 16).ok()?;
        }
        let mut octets = [0u8; 16];
        for i in 0..16 {
            octets[i] = (nibbles[i * 2] << 4) | nibbles[i * 2 + 1];
        }
        return Some(IpAddr::V6(Ipv6Addr::from(octets)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_ipv4_pod_label() {
        let addr = Ipv4Addr::new(10, 244, 1, 7);
        let label = encode_ipv4(addr);
        assert_eq!(label, "10-244-1-7");
        assert_eq!(decode_ipv4(&label), Some(addr));
    }

    #[test]
    fn should_round_trip_ipv6_full_pod_label() {
        let addr: Ipv6Addr = "fd00:1:2:3:4:5:6:7".parse().unwrap();
        let label = encode_ipv6(addr);
        assert_eq!(decode_ipv6(&label), Some(addr));
    }

    #[test]
    fn should_round_trip_ipv6_compressed_pod_label() {
        let addr: Ipv6Addr = "fd00::7".parse().unwrap();
        let label = encode_ipv6(addr);
        assert_eq!(label, "fd00--7");
        assert_eq!(decode_ipv6(&label), Some(addr));
    }

    #[test]
    fn should_round_trip_unspecified_ipv6_pod_label() {
        let addr: Ipv6Addr = "::".parse().unwrap();
        let label = encode_ipv6(addr);
        assert_eq!(label, "--");
        assert_eq!(decode_ipv6(&label), Some(addr));
    }

    #[test]
    fn should_round_trip_ipv4_reverse_name() {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let name = format_reverse_name(addr);
        assert_eq!(name, "1.0.0.10.in-addr.arpa.");
        assert_eq!(parse_reverse_name(&name), Some(addr));
    }

    #[test]
    fn should_round_trip_ipv6_reverse_name() {
        let addr: IpAddr = "fd00::7".parse().unwrap();
        let name = format_reverse_name(addr);
        assert_eq!(parse_reverse_name(&name), Some(addr));
    }

    #[test]
    fn should_reject_malformed_reverse_name() {
        assert_eq!(parse_reverse_name("not-an-arpa-name."), None);
        assert_eq!(parse_reverse_name("1.2.3.in-addr.arpa."), None);
    }

    #[test]
    fn should_reject_malformed_pod_label() {
        assert_eq!(decode_pod_label("not-an-ip"), None);
        assert_eq!(decode_pod_label("1-2-3"), None);
    }
}
