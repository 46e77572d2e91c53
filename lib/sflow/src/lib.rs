//! sFlow v5 datagram decoding.
//!
//! See https://sflow.org/SFLOW-DATAGRAM5.txt and https://sflow.org/SFLOW-STRUCTS5.txt
//! for the wire format. Decoding never panics, every length and count read
//! from the wire is checked against what is left of the buffer first.

mod counter;
mod datagram;
mod error;
mod flow;
mod reader;
mod record;
mod sample;
mod tag;

use serde::{Deserialize, Serialize};

pub use counter::{
    COUNTER_TYPE_CPU, COUNTER_TYPE_ETH, COUNTER_TYPE_IF, COUNTER_TYPE_OF_PORT,
    COUNTER_TYPE_OF_PORT_NAME, CounterRecord, DatapathId, EthernetCounters, FreeMemoryMode,
    IfCounters, OpenFlowPort, ProcessorCounters,
};
pub use datagram::{Datagram, DroppedSample, VERSION};
pub use error::Error;
pub use flow::{
    AsPathSegment, ExtendedGateway, ExtendedRouter, ExtendedSwitch, ExtendedUrl, ExtendedUser,
    FlowRecord, HEADER_PROTOCOL_ETHERNET, RawPacket, SampledIpv4, SampledIpv6,
};
pub use reader::{Reader, padding};
pub use sample::{CounterSample, FlowSample};
pub use tag::{Interface, SourceRef, SourceRefMode, Tag};

/// Knobs for the places where deployed agents and collectors disagree.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeOptions {
    /// Interpretation of the two source id words of expanded samples.
    pub expanded_source_ref: SourceRefMode,

    /// Reconstruction of processor free memory.
    pub free_memory: FreeMemoryMode,

    /// Records and samples with a non-zero enterprise are not decoded as
    /// their standard counterparts. Disable to dispatch on the format alone.
    pub strict_enterprise: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            expanded_source_ref: SourceRefMode::Literal,
            free_memory: FreeMemoryMode::Combined,
            strict_enterprise: true,
        }
    }
}
