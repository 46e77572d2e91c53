//! Builders for synthetic sFlow v5 wire data.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const SAMPLE_FORMAT_FLOW: u32 = 1;
const SAMPLE_FORMAT_COUNTER: u32 = 2;
const SAMPLE_FORMAT_EXPANDED_FLOW: u32 = 3;
const SAMPLE_FORMAT_EXPANDED_COUNTER: u32 = 4;

const FLOW_TYPE_RAW: u32 = 1;
const COUNTER_TYPE_OF_PORT: u32 = 1004;
const COUNTER_TYPE_OF_PORT_NAME: u32 = 1005;

/// Big-endian byte builder.
#[derive(Clone, Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Raw bytes, no length prefix and no padding.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Length prefix, data and zero padding up to a multiple of 4.
    pub fn opaque(self, data: &[u8]) -> Self {
        let pad = (4 - data.len() % 4) % 4;
        self.u32(data.len() as u32).bytes(data).bytes(&[0; 3][..pad])
    }

    pub fn string(self, s: &str) -> Self {
        self.opaque(s.as_bytes())
    }

    pub fn ipv4(self, addr: Ipv4Addr) -> Self {
        self.bytes(&addr.octets())
    }

    pub fn ipv6(self, addr: Ipv6Addr) -> Self {
        self.bytes(&addr.octets())
    }

    /// Address type word followed by the address.
    pub fn address(self, addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(addr) => self.u32(1).ipv4(addr),
            IpAddr::V6(addr) => self.u32(2).ipv6(addr),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Tag word, body length and body.
pub fn record(enterprise: u32, format: u32, body: &[u8]) -> Vec<u8> {
    Writer::new()
        .u32((enterprise << 12) | format)
        .u32(body.len() as u32)
        .bytes(body)
        .finish()
}

/// Samples share the record framing.
pub fn sample(enterprise: u32, format: u32, body: &[u8]) -> Vec<u8> {
    record(enterprise, format, body)
}

/// An Ethernet raw packet header record, the frame length is the header length.
pub fn raw_packet_record(header: &[u8]) -> Vec<u8> {
    let body = Writer::new()
        .u32(1)
        .u32(header.len() as u32)
        .u32(0)
        .opaque(header)
        .finish();

    record(0, FLOW_TYPE_RAW, &body)
}

pub fn of_port_record(datapath_id: [u8; 8], port: u32) -> Vec<u8> {
    let body = Writer::new().bytes(&datapath_id).u32(port).finish();

    record(0, COUNTER_TYPE_OF_PORT, &body)
}

pub fn of_port_name_record(name: &str) -> Vec<u8> {
    record(0, COUNTER_TYPE_OF_PORT_NAME, &Writer::new().string(name).finish())
}

fn with_records(writer: Writer, records: &[Vec<u8>]) -> Vec<u8> {
    records
        .iter()
        .fold(writer.u32(records.len() as u32), |w, r| w.bytes(r))
        .finish()
}

/// A compact flow sample with source class 0 and single-interface input and
/// output.
pub fn flow_sample(
    sequence: u32,
    source_index: u32,
    input: u32,
    output: u32,
    records: &[Vec<u8>],
) -> Vec<u8> {
    let header = Writer::new()
        .u32(sequence)
        .u32(source_index & 0x3FFF_FFFF)
        .u32(1)
        .u32(sequence)
        .u32(0)
        .u32(input & 0x3FFF_FFFF)
        .u32(output & 0x3FFF_FFFF);

    sample(0, SAMPLE_FORMAT_FLOW, &with_records(header, records))
}

pub fn expanded_flow_sample(
    sequence: u32,
    source_class: u32,
    source_index: u32,
    input: u32,
    output: u32,
    records: &[Vec<u8>],
) -> Vec<u8> {
    let header = Writer::new()
        .u32(sequence)
        .u32(source_class)
        .u32(source_index)
        .u32(1)
        .u32(sequence)
        .u32(0)
        .u32(0)
        .u32(input)
        .u32(0)
        .u32(output);

    sample(0, SAMPLE_FORMAT_EXPANDED_FLOW, &with_records(header, records))
}

pub fn counter_sample(sequence: u32, source_index: u32, records: &[Vec<u8>]) -> Vec<u8> {
    let header = Writer::new()
        .u32(sequence)
        .u32(source_index & 0x3FFF_FFFF);

    sample(0, SAMPLE_FORMAT_COUNTER, &with_records(header, records))
}

pub fn expanded_counter_sample(
    sequence: u32,
    source_class: u32,
    source_index: u32,
    records: &[Vec<u8>],
) -> Vec<u8> {
    let header = Writer::new()
        .u32(sequence)
        .u32(source_class)
        .u32(source_index);

    sample(
        0,
        SAMPLE_FORMAT_EXPANDED_COUNTER,
        &with_records(header, records),
    )
}

/// A version 5 datagram from an IPv4 agent.
pub fn datagram(agent: Ipv4Addr, sequence: u32, samples: &[Vec<u8>]) -> Vec<u8> {
    let header = Writer::new()
        .u32(5)
        .address(IpAddr::V4(agent))
        .u32(0)
        .u32(sequence)
        .u32(sequence.wrapping_mul(1000));

    with_records(header, samples)
}
