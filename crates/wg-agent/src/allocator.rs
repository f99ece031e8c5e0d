//! Address Allocator
//!
//! Pure allocation of the lowest free host address in a subnet. The caller
//! owns reservation: the returned address only becomes unavailable to a
//! concurrent allocation once it is committed to the registry, so the
//! allocator must be invoked inside the same critical section as that
//! commit.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::HashSet;
use std::net::IpAddr;

/// The subnet has no free host address left
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no available addresses in subnet {0}")]
pub struct NoCapacity(pub IpNet);

/// Pick the lowest free host address in `subnet`.
///
/// Walks host addresses in ascending order, skipping the network address,
/// the IPv4 broadcast address, and every member of `used` (mask-stripped
/// host addresses). The result carries a single-host mask (/32 or /128).
///
/// Deterministic: identical inputs always yield the same address, whatever
/// order `used` was built in. Degenerate subnets (/32, /128) have no
/// usable host and always fail.
pub fn allocate(subnet: IpNet, used: &HashSet<IpAddr>) -> Result<IpNet, NoCapacity> {
    match subnet {
        IpNet::V4(net) => {
            // hosts() already excludes the broadcast address, but for /31
            // and /32 it includes the network address; skip it explicitly.
            let network = net.network();
            for host in net.hosts() {
                if host == network || used.contains(&IpAddr::V4(host)) {
                    continue;
                }
                let single = Ipv4Net::new(host, 32).expect("/32 is a valid prefix length");
                return Ok(IpNet::V4(single));
            }
        }
        IpNet::V6(net) => {
            let network = net.network();
            for host in net.hosts() {
                if host == network || used.contains(&IpAddr::V6(host)) {
                    continue;
                }
                let single = Ipv6Net::new(host, 128).expect("/128 is a valid prefix length");
                return Ok(IpNet::V6(single));
            }
        }
    }
    Err(NoCapacity(subnet))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_allocates_lowest_host() {
        let got = allocate(subnet("10.8.0.0/29"), &HashSet::new()).unwrap();
        assert_eq!(got, subnet("10.8.0.1/32"));
    }

    #[test]
    fn test_skips_used_addresses() {
        let used: HashSet<IpAddr> = [addr("10.8.0.1"), addr("10.8.0.2")].into();
        let got = allocate(subnet("10.8.0.0/29"), &used).unwrap();
        assert_eq!(got, subnet("10.8.0.3/32"));
    }

    #[test]
    fn test_fills_gaps_first() {
        let used: HashSet<IpAddr> = [addr("10.8.0.1"), addr("10.8.0.3")].into();
        let got = allocate(subnet("10.8.0.0/29"), &used).unwrap();
        assert_eq!(got, subnet("10.8.0.2/32"));
    }

    #[test]
    fn test_never_returns_network_or_broadcast() {
        // .1 through .5 taken; .6 is the last usable host in a /29
        let used: HashSet<IpAddr> = (1..=5).map(|i| addr(&format!("10.8.0.{i}"))).collect();
        let got = allocate(subnet("10.8.0.0/29"), &used).unwrap();
        assert_eq!(got, subnet("10.8.0.6/32"));

        let used: HashSet<IpAddr> = (1..=6).map(|i| addr(&format!("10.8.0.{i}"))).collect();
        assert_eq!(
            allocate(subnet("10.8.0.0/29"), &used),
            Err(NoCapacity(subnet("10.8.0.0/29")))
        );
    }

    #[test]
    fn test_degenerate_subnets_have_no_capacity() {
        assert!(allocate(subnet("10.8.0.1/32"), &HashSet::new()).is_err());
        assert!(allocate(subnet("fd00::1/128"), &HashSet::new()).is_err());
    }

    #[test]
    fn test_point_to_point_subnet() {
        // RFC 3021 /31: the non-network address is usable
        let got = allocate(subnet("10.8.0.0/31"), &HashSet::new()).unwrap();
        assert_eq!(got, subnet("10.8.0.1/32"));
    }

    #[test]
    fn test_ipv6_subnet() {
        let got = allocate(subnet("fd42:42:42::/126"), &HashSet::new()).unwrap();
        assert_eq!(got, subnet("fd42:42:42::1/128"));
    }

    #[test]
    fn test_deterministic_regardless_of_insertion_order() {
        let forward: HashSet<IpAddr> = (1..=4).map(|i| addr(&format!("10.8.0.{i}"))).collect();
        let backward: HashSet<IpAddr> = (1..=4).rev().map(|i| addr(&format!("10.8.0.{i}"))).collect();

        let a = allocate(subnet("10.8.0.0/28"), &forward).unwrap();
        let b = allocate(subnet("10.8.0.0/28"), &backward).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, subnet("10.8.0.5/32"));
    }

    #[test]
    fn test_used_outside_subnet_is_ignored() {
        let used: HashSet<IpAddr> = [addr("192.168.1.1")].into();
        let got = allocate(subnet("10.8.0.0/29"), &used).unwrap();
        assert_eq!(got, subnet("10.8.0.1/32"));
    }
}
