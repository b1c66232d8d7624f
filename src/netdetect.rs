use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed and the result is sorted by network address.
pub fn detect_local_networks() -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    let mut nets: Vec<Ipv4Net> = set.into_iter().collect();
    nets.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    Ok(nets)
}

/// Convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}

/// First and last host address of a network, as a scan range.
///
/// Network and broadcast addresses are excluded where the prefix leaves room
/// for them; /31 and /32 use every address.
pub fn host_range(net: Ipv4Net) -> (Ipv4Addr, Ipv4Addr) {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if end - start < 2 {
        return (net.network(), net.broadcast());
    }
    (Ipv4Addr::from(start + 1), Ipv4Addr::from(end - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cidr_from_ipv4() {
        let cidr = ipv4_to_default_cidr(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(cidr.to_string(), "10.1.2.0/24");
    }

    #[test]
    fn host_range_excludes_network_and_broadcast() {
        let net = Ipv4Net::new(Ipv4Addr::new(192, 168, 1, 0), 30).unwrap();
        assert_eq!(
            host_range(net),
            (Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2))
        );
    }

    #[test]
    fn tiny_networks_use_every_address() {
        let net = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 4), 31).unwrap();
        assert_eq!(host_range(net), (Ipv4Addr::new(10, 0, 0, 4), Ipv4Addr::new(10, 0, 0, 5)));
        let single = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 9), 32).unwrap();
        assert_eq!(host_range(single), (Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 9)));
    }
}
