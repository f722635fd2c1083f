//! Local address discovery for the printed connection URL.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use livetail_viewer::VIEW_PREFIX;

/// First non-loopback IPv4 address of this host.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Address other machines should use to reach a listener bound to `bound`.
pub fn advertised_addr(bound: SocketAddr) -> SocketAddr {
    if !bound.ip().is_unspecified() {
        return bound;
    }

    let ip = local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST);
    SocketAddr::new(IpAddr::V4(ip), bound.port())
}

pub fn view_url(addr: SocketAddr) -> String {
    format!("http://{addr}{VIEW_PREFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_address_is_kept() {
        let bound = SocketAddr::from(([192, 168, 1, 20], 8080));
        assert_eq!(advertised_addr(bound), bound);
    }

    #[test]
    fn test_unspecified_address_is_resolved() {
        let bound = SocketAddr::from(([0, 0, 0, 0], 4321));
        let advertised = advertised_addr(bound);

        assert_eq!(advertised.port(), 4321);
        assert!(!advertised.ip().is_unspecified());
    }

    #[test]
    fn test_view_url() {
        let addr = SocketAddr::from(([10, 0, 0, 5], 9000));
        assert_eq!(view_url(addr), "http://10.0.0.5:9000/view");
    }
}
