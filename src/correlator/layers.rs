use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, SingleVlanHeaderSlice,
    TcpHeaderSlice, UdpHeaderSlice,
};
use serde::{Serialize, Serializer};
use sflow::HEADER_PROTOCOL_ETHERNET;

const ETHER_TYPE_IPV4: u16 = 0x0800;
const ETHER_TYPE_IPV6: u16 = 0x86dd;
const ETHER_TYPE_VLAN: u16 = 0x8100;
const ETHER_TYPE_QINQ: u16 = 0x88a8;
const ETHER_TYPE_VLAN_DOUBLE: u16 = 0x9100;

const IP_PROTOCOL_TCP: u8 = 6;
const IP_PROTOCOL_UDP: u8 = 17;

/// Turns the header bytes of a raw packet record into something worth
/// keeping. The correlator stores the output without looking at it.
pub trait LayerDecoder: Send + Sync + 'static {
    type Output: Clone + Send + Sync + Serialize + 'static;

    fn decode(&self, protocol: u32, header: &[u8]) -> Self::Output;
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum Layer {
    Ethernet {
        source: MacAddr,
        destination: MacAddr,
        ether_type: u16,
    },
    Vlan {
        id: u16,
        priority: u8,
        ether_type: u16,
    },
    Ipv4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: u8,
        ttl: u8,
    },
    Ipv6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
    },
    Tcp {
        source_port: u16,
        destination_port: u16,
        flags: u8,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
    },
    /// Bytes left over once no further header could be parsed.
    Payload { length: usize },
    /// Header of a protocol other than Ethernet.
    Opaque { protocol: u32, length: usize },
}

/// Decodes Ethernet II frames down to the transport header.
///
/// sFlow agents cut the sampled header at a configured size, so any layer
/// may be truncated. Decoding stops at the first header that does not
/// parse, and whatever is left is reported as `Layer::Payload`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EthernetDecoder;

impl LayerDecoder for EthernetDecoder {
    type Output = Vec<Layer>;

    fn decode(&self, protocol: u32, header: &[u8]) -> Vec<Layer> {
        if protocol != HEADER_PROTOCOL_ETHERNET {
            return vec![Layer::Opaque {
                protocol,
                length: header.len(),
            }];
        }

        let mut layers = Vec::with_capacity(4);
        let rest = decode_ethernet(header, &mut layers);
        if !rest.is_empty() {
            layers.push(Layer::Payload { length: rest.len() });
        }

        layers
    }
}

fn decode_ethernet<'a>(data: &'a [u8], layers: &mut Vec<Layer>) -> &'a [u8] {
    let Ok(eth) = Ethernet2HeaderSlice::from_slice(data) else {
        return data;
    };

    let mut ether_type = eth.ether_type().0;
    layers.push(Layer::Ethernet {
        source: MacAddr(eth.source()),
        destination: MacAddr(eth.destination()),
        ether_type,
    });

    let mut rest = &data[eth.slice().len()..];
    while matches!(
        ether_type,
        ETHER_TYPE_VLAN | ETHER_TYPE_QINQ | ETHER_TYPE_VLAN_DOUBLE
    ) {
        let Ok(vlan) = SingleVlanHeaderSlice::from_slice(rest) else {
            return rest;
        };

        ether_type = vlan.ether_type().0;
        layers.push(Layer::Vlan {
            id: vlan.vlan_identifier().value(),
            priority: vlan.priority_code_point().value(),
            ether_type,
        });
        rest = &rest[vlan.slice().len()..];
    }

    match ether_type {
        ETHER_TYPE_IPV4 => decode_ipv4(rest, layers),
        ETHER_TYPE_IPV6 => decode_ipv6(rest, layers),
        _ => rest,
    }
}

fn decode_ipv4<'a>(data: &'a [u8], layers: &mut Vec<Layer>) -> &'a [u8] {
    let Ok(ip) = Ipv4HeaderSlice::from_slice(data) else {
        return data;
    };

    let protocol = ip.protocol().0;
    layers.push(Layer::Ipv4 {
        source: ip.source_addr(),
        destination: ip.destination_addr(),
        protocol,
        ttl: ip.ttl(),
    });

    let rest = &data[ip.slice().len()..];

    // only the first fragment carries the transport header
    if ip.fragments_offset().value() != 0 {
        return rest;
    }

    decode_transport(protocol, rest, layers)
}

fn decode_ipv6<'a>(data: &'a [u8], layers: &mut Vec<Layer>) -> &'a [u8] {
    let Ok(ip) = Ipv6HeaderSlice::from_slice(data) else {
        return data;
    };

    let next_header = ip.next_header().0;
    layers.push(Layer::Ipv6 {
        source: ip.source_addr(),
        destination: ip.destination_addr(),
        next_header,
        hop_limit: ip.hop_limit(),
    });

    decode_transport(next_header, &data[ip.slice().len()..], layers)
}

fn decode_transport<'a>(protocol: u8, data: &'a [u8], layers: &mut Vec<Layer>) -> &'a [u8] {
    match protocol {
        IP_PROTOCOL_TCP => match TcpHeaderSlice::from_slice(data) {
            Ok(tcp) => {
                layers.push(Layer::Tcp {
                    source_port: tcp.source_port(),
                    destination_port: tcp.destination_port(),
                    flags: tcp_flags(&tcp),
                });

                &data[tcp.slice().len()..]
            }
            Err(_) => data,
        },
        IP_PROTOCOL_UDP => match UdpHeaderSlice::from_slice(data) {
            Ok(udp) => {
                layers.push(Layer::Udp {
                    source_port: udp.source_port(),
                    destination_port: udp.destination_port(),
                });

                &data[udp.slice().len()..]
            }
            Err(_) => data,
        },
        _ => data,
    }
}

/// The eight flag bits of the TCP header, CWR first.
fn tcp_flags(tcp: &TcpHeaderSlice<'_>) -> u8 {
    [
        tcp.cwr(),
        tcp.ece(),
        tcp.urg(),
        tcp.ack(),
        tcp.psh(),
        tcp.rst(),
        tcp.syn(),
        tcp.fin(),
    ]
    .into_iter()
    .fold(0, |flags, set| (flags << 1) | u8::from(set))
}
