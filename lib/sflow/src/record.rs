use tracing::{debug, trace};

use crate::reader::Reader;
use crate::tag::Tag;
use crate::{DecodeOptions, Error};

/// Every record starts with a tag word and a body length word.
pub(crate) const RECORD_HEADER_LEN: usize = 8;

/// A record kind nested inside a sample.
pub(crate) trait Record: Sized {
    /// Decodes one record from a reader bounded to exactly its declared body.
    ///
    /// `Ok(None)` means the tag is not known at all, so the remaining
    /// records of the sample cannot be trusted.
    fn decode(
        tag: Tag,
        length: u32,
        body: &mut Reader<'_>,
        options: &DecodeOptions,
    ) -> Result<Option<Self>, Error>;
}

pub(crate) enum Outcome<T> {
    Decoded(T),
    Unknown(Tag),
}

/// Reads the record header, decodes the body and checks that the body was
/// consumed to its declared length.
pub(crate) fn decode_one<T: Record>(
    reader: &mut Reader<'_>,
    options: &DecodeOptions,
) -> Result<Outcome<T>, Error> {
    let tag = Tag::decode(reader.read_u32()?);
    let length = reader.read_u32()?;
    let mut body = reader.take(length as usize)?;

    match T::decode(tag, length, &mut body, options)? {
        Some(record) => {
            body.finish()?;
            Ok(Outcome::Decoded(record))
        }
        None => Ok(Outcome::Unknown(tag)),
    }
}

/// Decodes a counted record list. Stops early at the first unknown tag and
/// reports it, records decoded before it are kept.
pub(crate) fn decode_all<T: Record>(
    reader: &mut Reader<'_>,
    options: &DecodeOptions,
) -> Result<(Vec<T>, Option<Tag>), Error> {
    let count = reader.read_u32()?;
    reader.ensure_count(count, RECORD_HEADER_LEN)?;

    let mut records = Vec::with_capacity(count as usize);
    for index in 0..count {
        match decode_one::<T>(reader, options)? {
            Outcome::Decoded(record) => records.push(record),
            Outcome::Unknown(tag) => {
                debug!(
                    message = "unknown record type, abandon remaining records",
                    %tag,
                    index,
                    count,
                );

                return Ok((records, Some(tag)));
            }
        }
    }

    Ok((records, None))
}

/// Consumes an entire body that is known but not decoded.
pub(crate) fn skip(tag: Tag, length: u32, body: &mut Reader<'_>) -> Result<(), Error> {
    trace!(message = "skip unsupported record", %tag, length);

    body.skip(body.remaining())
}
