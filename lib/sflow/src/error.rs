use crate::tag::Tag;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("empty datagram")]
    EmptyDatagram,

    #[error("incompatible version {0}")]
    IncompatibleVersion(u32),

    #[error("unknown address type {0}")]
    UnknownAddressType(u32),

    #[error("buffer underrun, need {needed} bytes but only {remaining} remain")]
    BufferUnderrun { needed: usize, remaining: usize },

    #[error("count {count} needs at least {min_size} bytes but only {remaining} remain")]
    MalformedCount {
        count: u32,
        min_size: usize,
        remaining: usize,
    },

    #[error("unknown record type {0}")]
    UnknownRecordType(Tag),

    #[error("unknown sample type {0}")]
    UnknownSampleType(Tag),

    #[error("cursor desync, declared {expected} bytes but consumed {consumed}")]
    Desync { expected: usize, consumed: usize },
}
