use std::net::IpAddr;

use serde::Serialize;
use tracing::debug;

use crate::reader::Reader;
use crate::sample::{
    CounterSample, FlowSample, SAMPLE_FORMAT_COUNTER, SAMPLE_FORMAT_EXPANDED_COUNTER,
    SAMPLE_FORMAT_EXPANDED_FLOW, SAMPLE_FORMAT_FLOW,
};
use crate::tag::Tag;
use crate::{DecodeOptions, Error};

pub const VERSION: u32 = 5;

/// The smallest sample on the wire is its tag and length words.
const SAMPLE_HEADER_LEN: usize = 8;

/// A sample that could not be decoded. The rest of the datagram is unaffected
/// unless the sample's own length could not be trusted.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DroppedSample {
    /// Position of the sample within the datagram.
    pub index: u32,
    pub tag: Tag,
    #[serde(serialize_with = "serialize_error")]
    pub error: Error,
}

fn serialize_error<S: serde::Serializer>(err: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Datagram {
    pub version: u32,
    pub agent_address: IpAddr,
    pub sub_agent_id: u32,
    pub sequence_number: u32,
    /// Milliseconds since the agent booted.
    pub uptime: u32,
    pub flow_samples: Vec<FlowSample>,
    pub counter_samples: Vec<CounterSample>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedSample>,
}

enum Sample {
    Flow(FlowSample),
    Counter(CounterSample),
}

impl Sample {
    fn abandoned(&self) -> bool {
        match self {
            Sample::Flow(sample) => sample.abandoned_at.is_some(),
            Sample::Counter(sample) => sample.abandoned_at.is_some(),
        }
    }
}

fn decode_sample(
    tag: Tag,
    buf: &mut Reader<'_>,
    options: &DecodeOptions,
) -> Result<Sample, Error> {
    if tag.enterprise != 0 && options.strict_enterprise {
        return Err(Error::UnknownSampleType(tag));
    }

    match tag.format {
        SAMPLE_FORMAT_FLOW => FlowSample::decode(buf, false, options).map(Sample::Flow),
        SAMPLE_FORMAT_COUNTER => CounterSample::decode(buf, false, options).map(Sample::Counter),
        SAMPLE_FORMAT_EXPANDED_FLOW => FlowSample::decode(buf, true, options).map(Sample::Flow),
        SAMPLE_FORMAT_EXPANDED_COUNTER => {
            CounterSample::decode(buf, true, options).map(Sample::Counter)
        }
        _ => Err(Error::UnknownSampleType(tag)),
    }
}

fn read_sample_header<'a>(buf: &mut Reader<'a>) -> Result<(Tag, Reader<'a>), Error> {
    let tag = Tag::decode(buf.read_u32()?);
    let length = buf.read_u32()?;
    let body = buf.take(length as usize)?;

    Ok((tag, body))
}

impl Datagram {
    /// Decodes with the default [`DecodeOptions`].
    pub fn decode(data: impl AsRef<[u8]>) -> Result<Datagram, Error> {
        Self::decode_with(data, &DecodeOptions::default())
    }

    /// Decodes one sFlow v5 datagram.
    ///
    /// Only header problems fail the whole datagram. A sample that cannot be
    /// decoded is recorded in [`Datagram::dropped`] and skipped by its
    /// declared length; if that length itself overruns the buffer, decoding
    /// stops there and the samples decoded so far are kept.
    pub fn decode_with(
        data: impl AsRef<[u8]>,
        options: &DecodeOptions,
    ) -> Result<Datagram, Error> {
        let data = data.as_ref();
        if data.is_empty() {
            return Err(Error::EmptyDatagram);
        }

        let mut buf = Reader::new(data);
        let version = buf.read_u32()?;
        if version != VERSION {
            return Err(Error::IncompatibleVersion(version));
        }

        let agent_address = buf.read_address()?;
        let sub_agent_id = buf.read_u32()?;
        let sequence_number = buf.read_u32()?;
        let uptime = buf.read_u32()?;
        let count = buf.read_u32()?;
        buf.ensure_count(count, SAMPLE_HEADER_LEN)?;

        let mut flow_samples = Vec::new();
        let mut counter_samples = Vec::new();
        let mut dropped = Vec::new();
        for index in 0..count {
            let (tag, mut body) = match read_sample_header(&mut buf) {
                Ok(header) => header,
                Err(error) => {
                    debug!(
                        message = "sample header overruns datagram",
                        index,
                        count,
                        %error,
                    );

                    dropped.push(DroppedSample {
                        index,
                        tag: Tag::default(),
                        error,
                    });
                    break;
                }
            };

            let result = decode_sample(tag, &mut body, options).and_then(|sample| {
                // an abandoned sample leaves its trailing records unread
                if !sample.abandoned() {
                    body.finish()?;
                }

                Ok(sample)
            });

            match result {
                Ok(Sample::Flow(sample)) => flow_samples.push(sample),
                Ok(Sample::Counter(sample)) => counter_samples.push(sample),
                Err(error) => {
                    debug!(message = "drop sample", index, %tag, %error);

                    dropped.push(DroppedSample { index, tag, error });
                }
            }
        }

        Ok(Datagram {
            version,
            agent_address,
            sub_agent_id,
            sequence_number,
            uptime,
            flow_samples,
            counter_samples,
            dropped,
        })
    }
}
