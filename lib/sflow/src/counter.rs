use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::reader::Reader;
use crate::record::{self, Record};
use crate::tag::Tag;
use crate::{DecodeOptions, Error};

// Opaque counter_data types according to https://sflow.org/SFLOW-STRUCTS5.txt
pub const COUNTER_TYPE_IF: u32 = 1;
pub const COUNTER_TYPE_ETH: u32 = 2;
const COUNTER_TYPE_TOKENRING: u32 = 3;
const COUNTER_TYPE_VLAN: u32 = 5;
const COUNTER_TYPE_LACP: u32 = 7;
pub const COUNTER_TYPE_CPU: u32 = 1001;

// According to https://sflow.org/sflow_openflow.txt
pub const COUNTER_TYPE_OF_PORT: u32 = 1004;
pub const COUNTER_TYPE_OF_PORT_NAME: u32 = 1005;

// According to https://sflow.org/sflow_host.txt
const COUNTER_TYPE_HOST_DESCRIPTION: u32 = 2000;
const COUNTER_TYPE_MIB2_UDP_GROUP: u32 = 2010;

/// Known counter record types that are skipped instead of decoded.
fn excluded(format: u32) -> bool {
    matches!(
        format,
        COUNTER_TYPE_TOKENRING..=COUNTER_TYPE_VLAN
            | COUNTER_TYPE_LACP
            | COUNTER_TYPE_HOST_DESCRIPTION..=COUNTER_TYPE_MIB2_UDP_GROUP
    )
}

/// How the free memory of a processor record is rebuilt from its two
/// 32-bit halves.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeMemoryMode {
    /// `high << 32 | low`, the same as total memory.
    #[default]
    Combined,

    /// `high + low`, what some existing collectors report.
    Sum,
}

impl FreeMemoryMode {
    #[inline]
    fn combine(self, high: u32, low: u32) -> u64 {
        match self {
            FreeMemoryMode::Combined => ((high as u64) << 32) | low as u64,
            FreeMemoryMode::Sum => high as u64 + low as u64,
        }
    }
}

/// An OpenFlow datapath id. Compared byte for byte, never as a number.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DatapathId(pub [u8; 8]);

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02x}")?;
        }

        Ok(())
    }
}

impl Serialize for DatapathId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IfCounters {
    pub if_index: u32,
    pub if_type: u32,
    pub if_speed: u64,
    pub if_direction: u32,
    pub if_status: u32,
    pub if_in_octets: u64,
    pub if_in_ucast_pkts: u32,
    pub if_in_multicast_pkts: u32,
    pub if_in_broadcast_pkts: u32,
    pub if_in_discards: u32,
    pub if_in_errors: u32,
    pub if_in_unknown_protos: u32,
    pub if_out_octets: u64,
    pub if_out_ucast_pkts: u32,
    pub if_out_multicast_pkts: u32,
    pub if_out_broadcast_pkts: u32,
    pub if_out_discards: u32,
    pub if_out_errors: u32,
    pub if_promiscuous_mode: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EthernetCounters {
    pub alignment_errors: u32,
    pub fcs_errors: u32,
    pub single_collision_frames: u32,
    pub multiple_collision_frames: u32,
    pub sqe_test_errors: u32,
    pub deferred_transmissions: u32,
    pub late_collisions: u32,
    pub excessive_collisions: u32,
    pub internal_mac_transmit_errors: u32,
    pub carrier_sense_errors: u32,
    pub frame_too_longs: u32,
    pub internal_mac_receive_errors: u32,
    pub symbol_errors: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProcessorCounters {
    /// Percentages in hundredths, 5% is 500.
    pub five_sec_cpu: u32,
    pub one_min_cpu: u32,
    pub five_min_cpu: u32,
    pub total_memory: u64,
    pub free_memory: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OpenFlowPort {
    pub datapath_id: DatapathId,
    pub port: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterRecord {
    Interface(IfCounters),
    Ethernet(EthernetCounters),
    Processor(ProcessorCounters),
    OpenFlowPort(OpenFlowPort),
    OpenFlowPortName { name: String },
    /// A known type that is not decoded, its body was skipped.
    Unsupported { tag: Tag, length: u32 },
}

fn decode_if_counters(buf: &mut Reader<'_>) -> Result<IfCounters, Error> {
    Ok(IfCounters {
        if_index: buf.read_u32()?,
        if_type: buf.read_u32()?,
        if_speed: buf.read_u64()?,
        if_direction: buf.read_u32()?,
        if_status: buf.read_u32()?,
        if_in_octets: buf.read_u64()?,
        if_in_ucast_pkts: buf.read_u32()?,
        if_in_multicast_pkts: buf.read_u32()?,
        if_in_broadcast_pkts: buf.read_u32()?,
        if_in_discards: buf.read_u32()?,
        if_in_errors: buf.read_u32()?,
        if_in_unknown_protos: buf.read_u32()?,
        if_out_octets: buf.read_u64()?,
        if_out_ucast_pkts: buf.read_u32()?,
        if_out_multicast_pkts: buf.read_u32()?,
        if_out_broadcast_pkts: buf.read_u32()?,
        if_out_discards: buf.read_u32()?,
        if_out_errors: buf.read_u32()?,
        if_promiscuous_mode: buf.read_u32()?,
    })
}

fn decode_ethernet_counters(buf: &mut Reader<'_>) -> Result<EthernetCounters, Error> {
    Ok(EthernetCounters {
        alignment_errors: buf.read_u32()?,
        fcs_errors: buf.read_u32()?,
        single_collision_frames: buf.read_u32()?,
        multiple_collision_frames: buf.read_u32()?,
        sqe_test_errors: buf.read_u32()?,
        deferred_transmissions: buf.read_u32()?,
        late_collisions: buf.read_u32()?,
        excessive_collisions: buf.read_u32()?,
        internal_mac_transmit_errors: buf.read_u32()?,
        carrier_sense_errors: buf.read_u32()?,
        frame_too_longs: buf.read_u32()?,
        internal_mac_receive_errors: buf.read_u32()?,
        symbol_errors: buf.read_u32()?,
    })
}

fn decode_processor(
    buf: &mut Reader<'_>,
    mode: FreeMemoryMode,
) -> Result<ProcessorCounters, Error> {
    let five_sec_cpu = buf.read_u32()?;
    let one_min_cpu = buf.read_u32()?;
    let five_min_cpu = buf.read_u32()?;
    let total_memory = FreeMemoryMode::Combined.combine(buf.read_u32()?, buf.read_u32()?);
    let free_memory = mode.combine(buf.read_u32()?, buf.read_u32()?);

    Ok(ProcessorCounters {
        five_sec_cpu,
        one_min_cpu,
        five_min_cpu,
        total_memory,
        free_memory,
    })
}

impl Record for CounterRecord {
    fn decode(
        tag: Tag,
        length: u32,
        buf: &mut Reader<'_>,
        options: &DecodeOptions,
    ) -> Result<Option<Self>, Error> {
        if tag.enterprise != 0 && options.strict_enterprise {
            record::skip(tag, length, buf)?;
            return Ok(Some(CounterRecord::Unsupported { tag, length }));
        }

        let record = match tag.format {
            COUNTER_TYPE_IF => CounterRecord::Interface(decode_if_counters(buf)?),
            COUNTER_TYPE_ETH => CounterRecord::Ethernet(decode_ethernet_counters(buf)?),
            COUNTER_TYPE_CPU => {
                CounterRecord::Processor(decode_processor(buf, options.free_memory)?)
            }
            COUNTER_TYPE_OF_PORT => CounterRecord::OpenFlowPort(OpenFlowPort {
                datapath_id: DatapathId(buf.read_array()?),
                port: buf.read_u32()?,
            }),
            COUNTER_TYPE_OF_PORT_NAME => CounterRecord::OpenFlowPortName {
                name: buf.read_string()?,
            },
            format if excluded(format) => {
                record::skip(tag, length, buf)?;
                CounterRecord::Unsupported { tag, length }
            }
            _ => return Ok(None),
        };

        Ok(Some(record))
    }
}
