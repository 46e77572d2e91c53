//! Local UDP addresses for tests that need a real socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::Range;

use rand::Rng;

pub type Port = u16;

const RANDOM_PORTS: Range<Port> = 15000..25000;
const RANDOM_ATTEMPTS: usize = 10;

fn bind_udp(addr: SocketAddr) -> Option<Port> {
    let socket = UdpSocket::bind(addr).ok()?;
    socket.local_addr().ok().map(|addr| addr.port())
}

/// Whether nothing is bound to the UDP port right now.
pub fn is_free_udp(ip: IpAddr, port: Port) -> bool {
    bind_udp(SocketAddr::new(ip, port)).is_some()
}

/// Picks a UDP port nothing is bound to yet. Random ports are tried first
/// so parallel tests rarely race for the same one, then the OS is asked.
pub fn pick_unused_port(ip: IpAddr) -> Port {
    let mut rng = rand::rng();

    loop {
        for _ in 0..RANDOM_ATTEMPTS {
            let port = rng.random_range(RANDOM_PORTS);
            if is_free_udp(ip, port) {
                return port;
            }
        }

        if let Some(port) = bind_udp(SocketAddr::new(ip, 0)) {
            return port;
        }
    }
}

pub fn next_addr_for_ip(ip: IpAddr) -> SocketAddr {
    SocketAddr::new(ip, pick_unused_port(ip))
}

/// An unused UDP address on the loopback interface.
pub fn next_addr() -> SocketAddr {
    next_addr_for_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
