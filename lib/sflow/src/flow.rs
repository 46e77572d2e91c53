use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;

use crate::reader::{Reader, padding};
use crate::record::{self, Record};
use crate::tag::Tag;
use crate::{DecodeOptions, Error};

// Opaque flow_data types according to https://sflow.org/SFLOW-STRUCTS5.txt
pub const FLOW_TYPE_RAW: u32 = 1;
pub const FLOW_TYPE_ETH: u32 = 2;
pub const FLOW_TYPE_IPV4: u32 = 3;
pub const FLOW_TYPE_IPV6: u32 = 4;
pub const FLOW_TYPE_EXT_SWITCH: u32 = 1001;
pub const FLOW_TYPE_EXT_ROUTER: u32 = 1002;
pub const FLOW_TYPE_EXT_GATEWAY: u32 = 1003;
pub const FLOW_TYPE_EXT_USER: u32 = 1004;
pub const FLOW_TYPE_EXT_URL: u32 = 1005;
const FLOW_TYPE_EXT_MPLS: u32 = 1006;
const FLOW_TYPE_EXT_VLAN_TUNNEL: u32 = 1012;

// According to https://sflow.org/sflow_tunnels.txt
pub const FLOW_TYPE_IPV4_TUNNEL_EGRESS: u32 = 1023;
pub const FLOW_TYPE_IPV4_TUNNEL_INGRESS: u32 = 1024;
pub const FLOW_TYPE_IPV6_TUNNEL_EGRESS: u32 = 1025;
pub const FLOW_TYPE_IPV6_TUNNEL_INGRESS: u32 = 1026;
pub const FLOW_TYPE_DECAPSULATE_EGRESS: u32 = 1027;
pub const FLOW_TYPE_DECAPSULATE_INGRESS: u32 = 1028;
pub const FLOW_TYPE_VNI_EGRESS: u32 = 1029;
pub const FLOW_TYPE_VNI_INGRESS: u32 = 1030;

// According to https://sflow.org/sflow_drops.txt
const FLOW_TYPE_EGRESS_QUEUE: u32 = 1036;
const FLOW_TYPE_EXT_FUNCTION: u32 = 1038;

/// Header protocol of a raw packet record whose bytes start at the
/// Ethernet header.
pub const HEADER_PROTOCOL_ETHERNET: u32 = 1;

/// Known flow record types that are skipped instead of decoded.
fn excluded(format: u32) -> bool {
    matches!(
        format,
        FLOW_TYPE_ETH
            | FLOW_TYPE_EXT_MPLS..=FLOW_TYPE_EXT_VLAN_TUNNEL
            | FLOW_TYPE_EGRESS_QUEUE..=FLOW_TYPE_EXT_FUNCTION
    )
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RawPacket {
    pub header_protocol: u32,
    pub frame_length: u32,
    /// Bytes removed from the packet before sampling, e.g. the FCS.
    pub payload_removed: u32,
    pub header_length: u32,
    pub header: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SampledIpv4 {
    pub length: u32,
    pub protocol: u32,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u32,
    pub dst_port: u32,
    pub tcp_flags: u32,
    pub tos: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SampledIpv6 {
    pub length: u32,
    pub protocol: u32,
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
    pub src_port: u32,
    pub dst_port: u32,
    pub tcp_flags: u32,
    pub priority: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExtendedSwitch {
    pub src_vlan: u32,
    pub src_priority: u32,
    pub dst_vlan: u32,
    pub dst_priority: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExtendedRouter {
    pub next_hop: IpAddr,
    pub src_mask_len: u32,
    pub dst_mask_len: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AsPathSegment {
    /// 1 = AS_SET, 2 = AS_SEQUENCE
    pub path_type: u32,
    pub members: Vec<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExtendedGateway {
    pub next_hop: IpAddr,
    #[serde(rename = "as")]
    pub as_number: u32,
    pub src_as: u32,
    pub src_peer_as: u32,
    pub as_path: Vec<AsPathSegment>,
    pub communities: Vec<u32>,
    pub local_pref: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExtendedUser {
    pub src_charset: u32,
    pub src_user: String,
    pub dst_charset: u32,
    pub dst_user: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExtendedUrl {
    /// 1 = source address is the server, 2 = destination address is the server
    pub direction: u32,
    pub url: String,
    pub host: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowRecord {
    RawPacket(RawPacket),
    SampledIpv4(SampledIpv4),
    SampledIpv6(SampledIpv6),
    ExtendedSwitch(ExtendedSwitch),
    ExtendedRouter(ExtendedRouter),
    ExtendedGateway(ExtendedGateway),
    ExtendedUser(ExtendedUser),
    ExtendedUrl(ExtendedUrl),
    Ipv4TunnelEgress(SampledIpv4),
    Ipv4TunnelIngress(SampledIpv4),
    Ipv6TunnelEgress(SampledIpv6),
    Ipv6TunnelIngress(SampledIpv6),
    DecapsulateEgress { inner_header_offset: u32 },
    DecapsulateIngress { inner_header_offset: u32 },
    VniEgress { vni: u32 },
    VniIngress { vni: u32 },
    /// A known type that is not decoded, its body was skipped.
    Unsupported { tag: Tag, length: u32 },
}

impl FlowRecord {
    pub fn as_raw_packet(&self) -> Option<&RawPacket> {
        match self {
            FlowRecord::RawPacket(raw) => Some(raw),
            _ => None,
        }
    }
}

fn decode_raw_packet(buf: &mut Reader<'_>) -> Result<RawPacket, Error> {
    let header_protocol = buf.read_u32()?;
    let frame_length = buf.read_u32()?;
    let payload_removed = buf.read_u32()?;
    let header_length = buf.read_u32()?;

    let len = header_length as usize;
    let header = buf.read_bytes(len)?.to_vec();
    buf.skip(padding(len))?;

    Ok(RawPacket {
        header_protocol,
        frame_length,
        payload_removed,
        header_length,
        header,
    })
}

fn decode_sampled_ipv4(buf: &mut Reader<'_>) -> Result<SampledIpv4, Error> {
    Ok(SampledIpv4 {
        length: buf.read_u32()?,
        protocol: buf.read_u32()?,
        src_ip: buf.read_ipv4()?,
        dst_ip: buf.read_ipv4()?,
        src_port: buf.read_u32()?,
        dst_port: buf.read_u32()?,
        tcp_flags: buf.read_u32()?,
        tos: buf.read_u32()?,
    })
}

fn decode_sampled_ipv6(buf: &mut Reader<'_>) -> Result<SampledIpv6, Error> {
    Ok(SampledIpv6 {
        length: buf.read_u32()?,
        protocol: buf.read_u32()?,
        src_ip: buf.read_ipv6()?,
        dst_ip: buf.read_ipv6()?,
        src_port: buf.read_u32()?,
        dst_port: buf.read_u32()?,
        tcp_flags: buf.read_u32()?,
        priority: buf.read_u32()?,
    })
}

fn decode_gateway(buf: &mut Reader<'_>) -> Result<ExtendedGateway, Error> {
    let next_hop = buf.read_address()?;
    let as_number = buf.read_u32()?;
    let src_as = buf.read_u32()?;
    let src_peer_as = buf.read_u32()?;

    // each segment carries at least its type and member count
    let segments = buf.read_u32()?;
    buf.ensure_count(segments, 8)?;
    let mut as_path = Vec::with_capacity(segments as usize);
    for _ in 0..segments {
        let path_type = buf.read_u32()?;
        let count = buf.read_u32()?;
        buf.ensure_count(count, 4)?;

        let members = (0..count)
            .map(|_| buf.read_u32())
            .collect::<Result<Vec<_>, _>>()?;

        as_path.push(AsPathSegment { path_type, members });
    }

    let count = buf.read_u32()?;
    buf.ensure_count(count, 4)?;
    let communities = (0..count)
        .map(|_| buf.read_u32())
        .collect::<Result<Vec<_>, _>>()?;

    let local_pref = buf.read_u32()?;

    Ok(ExtendedGateway {
        next_hop,
        as_number,
        src_as,
        src_peer_as,
        as_path,
        communities,
        local_pref,
    })
}

impl Record for FlowRecord {
    fn decode(
        tag: Tag,
        length: u32,
        buf: &mut Reader<'_>,
        options: &DecodeOptions,
    ) -> Result<Option<Self>, Error> {
        if tag.enterprise != 0 && options.strict_enterprise {
            record::skip(tag, length, buf)?;
            return Ok(Some(FlowRecord::Unsupported { tag, length }));
        }

        let record = match tag.format {
            FLOW_TYPE_RAW => FlowRecord::RawPacket(decode_raw_packet(buf)?),
            FLOW_TYPE_IPV4 => FlowRecord::SampledIpv4(decode_sampled_ipv4(buf)?),
            FLOW_TYPE_IPV6 => FlowRecord::SampledIpv6(decode_sampled_ipv6(buf)?),
            FLOW_TYPE_EXT_SWITCH => FlowRecord::ExtendedSwitch(ExtendedSwitch {
                src_vlan: buf.read_u32()?,
                src_priority: buf.read_u32()?,
                dst_vlan: buf.read_u32()?,
                dst_priority: buf.read_u32()?,
            }),
            FLOW_TYPE_EXT_ROUTER => FlowRecord::ExtendedRouter(ExtendedRouter {
                next_hop: buf.read_address()?,
                src_mask_len: buf.read_u32()?,
                dst_mask_len: buf.read_u32()?,
            }),
            FLOW_TYPE_EXT_GATEWAY => FlowRecord::ExtendedGateway(decode_gateway(buf)?),
            FLOW_TYPE_EXT_USER => FlowRecord::ExtendedUser(ExtendedUser {
                src_charset: buf.read_u32()?,
                src_user: buf.read_string()?,
                dst_charset: buf.read_u32()?,
                dst_user: buf.read_string()?,
            }),
            FLOW_TYPE_EXT_URL => FlowRecord::ExtendedUrl(ExtendedUrl {
                direction: buf.read_u32()?,
                url: buf.read_string()?,
                host: buf.read_string()?,
            }),
            FLOW_TYPE_IPV4_TUNNEL_EGRESS => FlowRecord::Ipv4TunnelEgress(decode_sampled_ipv4(buf)?),
            FLOW_TYPE_IPV4_TUNNEL_INGRESS => {
                FlowRecord::Ipv4TunnelIngress(decode_sampled_ipv4(buf)?)
            }
            FLOW_TYPE_IPV6_TUNNEL_EGRESS => FlowRecord::Ipv6TunnelEgress(decode_sampled_ipv6(buf)?),
            FLOW_TYPE_IPV6_TUNNEL_INGRESS => {
                FlowRecord::Ipv6TunnelIngress(decode_sampled_ipv6(buf)?)
            }
            FLOW_TYPE_DECAPSULATE_EGRESS => FlowRecord::DecapsulateEgress {
                inner_header_offset: buf.read_u32()?,
            },
            FLOW_TYPE_DECAPSULATE_INGRESS => FlowRecord::DecapsulateIngress {
                inner_header_offset: buf.read_u32()?,
            },
            FLOW_TYPE_VNI_EGRESS => FlowRecord::VniEgress {
                vni: buf.read_u32()?,
            },
            FLOW_TYPE_VNI_INGRESS => FlowRecord::VniIngress {
                vni: buf.read_u32()?,
            },
            format if excluded(format) => {
                record::skip(tag, length, buf)?;
                FlowRecord::Unsupported { tag, length }
            }
            _ => return Ok(None),
        };

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use testify::wire::{self, Writer};

    use super::*;
    use crate::record::{Outcome, decode_one};

    fn decode(bytes: &[u8]) -> Result<FlowRecord, Error> {
        decode_with(bytes, &DecodeOptions::default())
    }

    fn decode_with(bytes: &[u8], options: &DecodeOptions) -> Result<FlowRecord, Error> {
        let mut reader = Reader::new(bytes);
        let outcome = decode_one::<FlowRecord>(&mut reader, options)?;
        // cursor lands exactly on the end of the declared body
        assert_eq!(reader.position(), bytes.len());

        match outcome {
            Outcome::Decoded(record) => Ok(record),
            Outcome::Unknown(tag) => Err(Error::UnknownRecordType(tag)),
        }
    }

    fn ipv4_body() -> Writer {
        Writer::new()
            .u32(1500)
            .u32(6)
            .ipv4("10.0.0.1".parse().unwrap())
            .ipv4("10.0.0.2".parse().unwrap())
            .u32(443)
            .u32(51000)
            .u32(0x18)
            .u32(0)
    }

    fn ipv4_expected() -> SampledIpv4 {
        SampledIpv4 {
            length: 1500,
            protocol: 6,
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 443,
            dst_port: 51000,
            tcp_flags: 0x18,
            tos: 0,
        }
    }

    fn ipv6_body() -> Writer {
        Writer::new()
            .u32(80)
            .u32(17)
            .ipv6("2001:db8::1".parse().unwrap())
            .ipv6("2001:db8::2".parse().unwrap())
            .u32(53)
            .u32(40000)
            .u32(0)
            .u32(5)
    }

    fn ipv6_expected() -> SampledIpv6 {
        SampledIpv6 {
            length: 80,
            protocol: 17,
            src_ip: "2001:db8::1".parse().unwrap(),
            dst_ip: "2001:db8::2".parse().unwrap(),
            src_port: 53,
            dst_port: 40000,
            tcp_flags: 0,
            priority: 5,
        }
    }

    fn gateway_body() -> Writer {
        Writer::new()
            .address("192.168.1.1".parse().unwrap())
            .u32(65000)
            .u32(65001)
            .u32(65002)
            .u32(2)
            .u32(2)
            .u32(3)
            .u32(100)
            .u32(200)
            .u32(300)
            .u32(1)
            .u32(1)
            .u32(400)
            .u32(2)
            .u32(0xFFFF_FF01)
            .u32(0x0001_0002)
            .u32(150)
    }

    #[test]
    fn supported_records() {
        let header: Vec<u8> = (0u8..14).collect();

        let cases: Vec<(u32, Writer, FlowRecord)> = vec![
            (
                FLOW_TYPE_RAW,
                Writer::new()
                    .u32(HEADER_PROTOCOL_ETHERNET)
                    .u32(64)
                    .u32(4)
                    .opaque(&header),
                FlowRecord::RawPacket(RawPacket {
                    header_protocol: 1,
                    frame_length: 64,
                    payload_removed: 4,
                    header_length: 14,
                    header: header.clone(),
                }),
            ),
            (
                FLOW_TYPE_IPV4,
                ipv4_body(),
                FlowRecord::SampledIpv4(ipv4_expected()),
            ),
            (
                FLOW_TYPE_IPV6,
                ipv6_body(),
                FlowRecord::SampledIpv6(ipv6_expected()),
            ),
            (
                FLOW_TYPE_EXT_SWITCH,
                Writer::new().u32(10).u32(1).u32(20).u32(2),
                FlowRecord::ExtendedSwitch(ExtendedSwitch {
                    src_vlan: 10,
                    src_priority: 1,
                    dst_vlan: 20,
                    dst_priority: 2,
                }),
            ),
            (
                FLOW_TYPE_EXT_ROUTER,
                Writer::new()
                    .address("2001:db8::fe".parse().unwrap())
                    .u32(48)
                    .u32(64),
                FlowRecord::ExtendedRouter(ExtendedRouter {
                    next_hop: "2001:db8::fe".parse().unwrap(),
                    src_mask_len: 48,
                    dst_mask_len: 64,
                }),
            ),
            (
                FLOW_TYPE_EXT_GATEWAY,
                gateway_body(),
                FlowRecord::ExtendedGateway(ExtendedGateway {
                    next_hop: "192.168.1.1".parse().unwrap(),
                    as_number: 65000,
                    src_as: 65001,
                    src_peer_as: 65002,
                    as_path: vec![
                        AsPathSegment {
                            path_type: 2,
                            members: vec![100, 200, 300],
                        },
                        AsPathSegment {
                            path_type: 1,
                            members: vec![400],
                        },
                    ],
                    communities: vec![0xFFFF_FF01, 0x0001_0002],
                    local_pref: 150,
                }),
            ),
            (
                FLOW_TYPE_EXT_USER,
                Writer::new()
                    .u32(106)
                    .string("alice")
                    .u32(106)
                    .string("bob"),
                FlowRecord::ExtendedUser(ExtendedUser {
                    src_charset: 106,
                    src_user: "alice".to_string(),
                    dst_charset: 106,
                    dst_user: "bob".to_string(),
                }),
            ),
            (
                FLOW_TYPE_EXT_URL,
                Writer::new()
                    .u32(1)
                    .string("/index.html")
                    .string("example.com"),
                FlowRecord::ExtendedUrl(ExtendedUrl {
                    direction: 1,
                    url: "/index.html".to_string(),
                    host: "example.com".to_string(),
                }),
            ),
            (
                FLOW_TYPE_IPV4_TUNNEL_EGRESS,
                ipv4_body(),
                FlowRecord::Ipv4TunnelEgress(ipv4_expected()),
            ),
            (
                FLOW_TYPE_IPV4_TUNNEL_INGRESS,
                ipv4_body(),
                FlowRecord::Ipv4TunnelIngress(ipv4_expected()),
            ),
            (
                FLOW_TYPE_IPV6_TUNNEL_EGRESS,
                ipv6_body(),
                FlowRecord::Ipv6TunnelEgress(ipv6_expected()),
            ),
            (
                FLOW_TYPE_IPV6_TUNNEL_INGRESS,
                ipv6_body(),
                FlowRecord::Ipv6TunnelIngress(ipv6_expected()),
            ),
            (
                FLOW_TYPE_DECAPSULATE_EGRESS,
                Writer::new().u32(14),
                FlowRecord::DecapsulateEgress {
                    inner_header_offset: 14,
                },
            ),
            (
                FLOW_TYPE_DECAPSULATE_INGRESS,
                Writer::new().u32(18),
                FlowRecord::DecapsulateIngress {
                    inner_header_offset: 18,
                },
            ),
            (
                FLOW_TYPE_VNI_EGRESS,
                Writer::new().u32(4096),
                FlowRecord::VniEgress { vni: 4096 },
            ),
            (
                FLOW_TYPE_VNI_INGRESS,
                Writer::new().u32(8192),
                FlowRecord::VniIngress { vni: 8192 },
            ),
        ];

        for (format, body, want) in cases {
            let bytes = wire::record(0, format, &body.finish());
            assert_eq!(decode(&bytes).unwrap(), want, "format {format}");
        }
    }

    #[test]
    fn truncated_records_underrun() {
        let bodies = [
            (FLOW_TYPE_RAW, Writer::new().u32(1).u32(64).u32(4).opaque(&[0xaa; 14])),
            (FLOW_TYPE_IPV4, ipv4_body()),
            (FLOW_TYPE_IPV6, ipv6_body()),
            (FLOW_TYPE_EXT_SWITCH, Writer::new().u32(10).u32(1).u32(20).u32(2)),
            (
                FLOW_TYPE_EXT_ROUTER,
                Writer::new()
                    .address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254)))
                    .u32(24)
                    .u32(16),
            ),
            (FLOW_TYPE_EXT_GATEWAY, gateway_body()),
            (FLOW_TYPE_EXT_USER, Writer::new().u32(0).string("a").u32(0).string("b")),
            (
                FLOW_TYPE_EXT_URL,
                Writer::new().u32(1).string("/index.html").string("example.com"),
            ),
            (FLOW_TYPE_IPV4_TUNNEL_EGRESS, ipv4_body()),
            (FLOW_TYPE_IPV4_TUNNEL_INGRESS, ipv4_body()),
            (FLOW_TYPE_IPV6_TUNNEL_EGRESS, ipv6_body()),
            (FLOW_TYPE_IPV6_TUNNEL_INGRESS, ipv6_body()),
            (FLOW_TYPE_DECAPSULATE_EGRESS, Writer::new().u32(14)),
            (FLOW_TYPE_DECAPSULATE_INGRESS, Writer::new().u32(14)),
            (FLOW_TYPE_VNI_EGRESS, Writer::new().u32(1)),
            (FLOW_TYPE_VNI_INGRESS, Writer::new().u32(1)),
        ];

        for (format, body) in bodies {
            let body = body.finish();
            for cut in 1..=body.len() {
                // the declared length is honest, the body itself is short
                let truncated = &body[..body.len() - cut];
                let bytes = wire::record(0, format, truncated);
                let err = decode(&bytes).unwrap_err();
                assert!(
                    matches!(
                        err,
                        Error::BufferUnderrun { .. } | Error::MalformedCount { .. }
                    ),
                    "format {format} cut {cut}: {err:?}"
                );
            }

            // the outer buffer ends early too
            let bytes = wire::record(0, format, &body);
            let mut reader = Reader::new(&bytes[..bytes.len() - 1]);
            assert!(matches!(
                decode_one::<FlowRecord>(&mut reader, &DecodeOptions::default()),
                Err(Error::BufferUnderrun { .. })
            ));
        }
    }

    #[test]
    fn excluded_records_are_skipped() {
        for format in [FLOW_TYPE_ETH, 1006, 1007, 1010, 1012, 1036, 1038] {
            let bytes = wire::record(0, format, &[0x55; 20]);
            assert_eq!(
                decode(&bytes).unwrap(),
                FlowRecord::Unsupported {
                    tag: Tag::new(0, format),
                    length: 20
                }
            );
        }
    }

    #[test]
    fn unknown_record() {
        let bytes = wire::record(0, 999, &[0; 8]);
        assert_eq!(
            decode(&bytes),
            Err(Error::UnknownRecordType(Tag::new(0, 999)))
        );
    }

    #[test]
    fn vendor_enterprise() {
        let body = Writer::new().u32(7).finish();
        let bytes = wire::record(4413, FLOW_TYPE_VNI_EGRESS, &body);

        assert_eq!(
            decode(&bytes).unwrap(),
            FlowRecord::Unsupported {
                tag: Tag::new(4413, FLOW_TYPE_VNI_EGRESS),
                length: 4
            }
        );

        let options = DecodeOptions {
            strict_enterprise: false,
            ..Default::default()
        };
        assert_eq!(
            decode_with(&bytes, &options).unwrap(),
            FlowRecord::VniEgress { vni: 7 }
        );
    }

    #[test]
    fn trailing_bytes_desync() {
        let body = Writer::new().u32(7).u32(0).finish();
        let bytes = wire::record(0, FLOW_TYPE_VNI_EGRESS, &body);
        assert_eq!(
            decode(&bytes),
            Err(Error::Desync {
                expected: 8,
                consumed: 4
            })
        );
    }

    #[test]
    fn as_path_count_too_large() {
        let body = Writer::new()
            .address("10.0.0.1".parse().unwrap())
            .u32(1)
            .u32(2)
            .u32(3)
            .u32(u32::MAX)
            .finish();
        let bytes = wire::record(0, FLOW_TYPE_EXT_GATEWAY, &body);
        assert!(matches!(
            decode(&bytes),
            Err(Error::MalformedCount {
                count: u32::MAX,
                ..
            })
        ));
    }
}
