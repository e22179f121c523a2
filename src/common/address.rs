//! Socket address classification used to validate peers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Returns true if `address` can be the contact address of a DHT node.
///
/// Rejects port 0, the unspecified address, broadcast and `0.0.0.0/8`
/// addresses, multicast, and documentation ranges.
pub fn is_valid_socket_addr(address: &SocketAddr) -> bool {
    if address.port() == 0 {
        return false;
    }

    match address.ip() {
        IpAddr::V4(ip) => is_valid_ipv4(&ip),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(ip) => is_valid_ipv4(&ip),
            None => is_valid_ipv6(&ip),
        },
    }
}

/// Returns true if `address` belongs to a private, loopback or link-local network.
pub fn is_private_addr(address: &SocketAddr) -> bool {
    match address.ip() {
        IpAddr::V4(ip) => is_private_ipv4(&ip),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(ip) => is_private_ipv4(&ip),
            None => is_private_ipv6(&ip),
        },
    }
}

/// Returns true if both addresses are IPv4 or both are IPv6.
pub fn is_same_address_space(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

fn is_valid_ipv4(ip: &Ipv4Addr) -> bool {
    let first = ip.octets()[0];

    !ip.is_unspecified()
        && !ip.is_broadcast()
        && !ip.is_multicast()
        && !ip.is_documentation()
        && first != 0x00
        && first != 0xFF
}

fn is_valid_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    // 2001:db8::/32
    let documentation = segments[0] == 0x2001 && segments[1] == 0x0db8;

    !ip.is_unspecified() && !ip.is_multicast() && !documentation
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    // 100.64.0.0/10
    let shared = a == 100 && (b & 0b1100_0000) == 64;

    ip.is_private() || ip.is_loopback() || ip.is_link_local() || shared
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7
    let unique_local = (first & 0xfe00) == 0xfc00;
    // fe80::/10
    let link_local = (first & 0xffc0) == 0xfe80;

    ip.is_loopback() || unique_local || link_local
}
