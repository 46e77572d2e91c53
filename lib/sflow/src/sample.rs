use serde::Serialize;

use crate::counter::CounterRecord;
use crate::flow::{FlowRecord, RawPacket};
use crate::reader::Reader;
use crate::record::decode_all;
use crate::tag::{Interface, SourceRef, Tag};
use crate::{DecodeOptions, Error};

// Opaque sample_data types according to https://sflow.org/SFLOW-DATAGRAM5.txt
pub const SAMPLE_FORMAT_FLOW: u32 = 1;
pub const SAMPLE_FORMAT_COUNTER: u32 = 2;
pub const SAMPLE_FORMAT_EXPANDED_FLOW: u32 = 3;
pub const SAMPLE_FORMAT_EXPANDED_COUNTER: u32 = 4;

fn decode_source(
    buf: &mut Reader<'_>,
    expanded: bool,
    options: &DecodeOptions,
) -> Result<SourceRef, Error> {
    if expanded {
        let class = buf.read_u32()?;
        let index = buf.read_u32()?;
        Ok(SourceRef::decode_expanded(
            class,
            index,
            options.expanded_source_ref,
        ))
    } else {
        buf.read_u32().map(SourceRef::decode_packed)
    }
}

fn decode_interface(buf: &mut Reader<'_>, expanded: bool) -> Result<Interface, Error> {
    if expanded {
        Ok(Interface {
            format: buf.read_u32()?,
            index: buf.read_u32()?,
        })
    } else {
        buf.read_u32().map(Interface::decode_packed)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FlowSample {
    pub expanded: bool,
    pub sequence_number: u32,
    pub source: SourceRef,
    pub sampling_rate: u32,
    pub sample_pool: u32,
    pub dropped: u32,
    pub input: Interface,
    pub output: Interface,
    pub records: Vec<FlowRecord>,
    /// Set when an unknown record type cut the record list short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abandoned_at: Option<Tag>,
}

impl FlowSample {
    pub(crate) fn decode(
        buf: &mut Reader<'_>,
        expanded: bool,
        options: &DecodeOptions,
    ) -> Result<Self, Error> {
        let sequence_number = buf.read_u32()?;
        let source = decode_source(buf, expanded, options)?;
        let sampling_rate = buf.read_u32()?;
        let sample_pool = buf.read_u32()?;
        let dropped = buf.read_u32()?;
        let input = decode_interface(buf, expanded)?;
        let output = decode_interface(buf, expanded)?;
        let (records, abandoned_at) = decode_all(buf, options)?;

        Ok(FlowSample {
            expanded,
            sequence_number,
            source,
            sampling_rate,
            sample_pool,
            dropped,
            input,
            output,
            records,
            abandoned_at,
        })
    }

    pub fn raw_packets(&self) -> impl Iterator<Item = &RawPacket> {
        self.records.iter().filter_map(FlowRecord::as_raw_packet)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CounterSample {
    pub expanded: bool,
    pub sequence_number: u32,
    pub source: SourceRef,
    pub records: Vec<CounterRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abandoned_at: Option<Tag>,
}

impl CounterSample {
    pub(crate) fn decode(
        buf: &mut Reader<'_>,
        expanded: bool,
        options: &DecodeOptions,
    ) -> Result<Self, Error> {
        let sequence_number = buf.read_u32()?;
        let source = decode_source(buf, expanded, options)?;
        let (records, abandoned_at) = decode_all(buf, options)?;

        Ok(CounterSample {
            expanded,
            sequence_number,
            source,
            records,
            abandoned_at,
        })
    }
}
