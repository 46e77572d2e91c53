use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the kind of a sample or record, `enterprise:20 | format:12`.
///
/// The same word layout is used for sample types, flow records and counter
/// records, the meaning of `format` depends on where the tag appears.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct Tag {
    pub enterprise: u32,
    pub format: u32,
}

impl Tag {
    pub const fn new(enterprise: u32, format: u32) -> Self {
        Tag { enterprise, format }
    }

    #[inline]
    pub const fn decode(word: u32) -> Self {
        Tag {
            enterprise: word >> 12,
            format: word & 0xFFF,
        }
    }

    #[inline]
    pub const fn encode(&self) -> u32 {
        (self.enterprise << 12) | (self.format & 0xFFF)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.enterprise, self.format)
    }
}

/// How the two words of an expanded source id are interpreted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRefMode {
    /// Both words are taken as they arrive.
    #[default]
    Literal,

    /// The class word is shifted right by 30 and the index word masked to
    /// 30 bits, the same split applied to the packed form. Some deployed
    /// collectors decode expanded samples this way.
    Packed,
}

/// The interface or entity a sample was taken from.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct SourceRef {
    pub class: u32,
    pub index: u32,
}

impl SourceRef {
    #[inline]
    pub const fn decode_packed(word: u32) -> Self {
        SourceRef {
            class: word >> 30,
            index: word & 0x3FFF_FFFF,
        }
    }

    pub const fn decode_expanded(class: u32, index: u32, mode: SourceRefMode) -> Self {
        match mode {
            SourceRefMode::Literal => SourceRef { class, index },
            SourceRefMode::Packed => SourceRef {
                class: class >> 30,
                index: index & 0x3FFF_FFFF,
            },
        }
    }

    #[inline]
    pub const fn encode_packed(&self) -> u32 {
        (self.class << 30) | (self.index & 0x3FFF_FFFF)
    }
}

/// Input or output interface of a flow sample.
///
/// `format` 0 means `index` is a single ifIndex, 1 means the packet was
/// discarded and 2 means `index` is a count of output interfaces.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct Interface {
    pub format: u32,
    pub index: u32,
}

impl Interface {
    pub const FORMAT_SINGLE: u32 = 0;

    #[inline]
    pub const fn decode_packed(word: u32) -> Self {
        Interface {
            format: word >> 30,
            index: word & 0x3FFF_FFFF,
        }
    }

    #[inline]
    pub const fn is_single(&self) -> bool {
        self.format == Self::FORMAT_SINGLE
    }
}
