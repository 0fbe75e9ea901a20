//! Document and record headers.

use tartan_bitfield::bitfield;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Leading bytes of a document header, before the optional check value.
pub const BASE_HEADER_LEN: usize = 12;

/// Length of a document header carrying its own check value.
pub const EXTENDED_HEADER_LEN: usize = 14;

/// Marker identifying a document as FIT data.
pub const DATA_TYPE_TAG: [u8; 4] = *b".FIT";

/// Highest protocol major version this crate decodes.
pub const SUPPORTED_PROTOCOL_MAJOR: u8 = 2;

pub(crate) const HDR_DEFINITION_BIT: u8 = 0x40;
pub(crate) const HDR_DEVELOPER_BIT: u8 = 0x20;
pub(crate) const HDR_COMPRESSED_BIT: u8 = 0x80;

/// An error in a document header.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FileHeaderError {
    /// Incorrect file type marker.
    #[error("Incorrect file type marker.")]
    NotFitData,
    /// Header length below the fixed leading bytes.
    #[error("Unknown header length ({0}).")]
    UnknownHeaderLength(u8),
}

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct RawFileHeader {
    pub header_size: u8,
    pub protocol_version: u8,
    pub profile_version: [u8; 2],
    pub data_size: [u8; 4],
    pub data_type: [u8; 4],
}

/// A decoded document header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    /// Total header length in bytes, at least [`BASE_HEADER_LEN`].
    pub header_size: u8,
    /// Protocol version, major in the high four bits.
    pub protocol_version: u8,
    /// Profile version the document was produced against.
    pub profile_version: u16,
    /// Record bytes in the document, excluding this header and the trailing
    /// check value.
    pub data_size: u32,
    /// File type marker, [`DATA_TYPE_TAG`] for FIT data.
    pub data_type: [u8; 4],
}

impl FileHeader {
    /// Decode the fixed leading bytes of a document header.
    ///
    /// Multi-byte fields are little-endian regardless of any record
    /// architecture declared later in the document.
    pub fn parse(r: [u8; BASE_HEADER_LEN]) -> Self {
        let RawFileHeader {
            header_size,
            protocol_version,
            profile_version,
            data_size,
            data_type,
        } = zerocopy::transmute!(r);

        Self {
            header_size,
            protocol_version,
            profile_version: u16::from_le_bytes(profile_version),
            data_size: u32::from_le_bytes(data_size),
            data_type,
        }
    }

    /// Protocol major version.
    pub fn protocol_major(&self) -> u8 {
        self.protocol_version >> 4
    }

    /// Protocol minor version.
    pub fn protocol_minor(&self) -> u8 {
        self.protocol_version & 0x0F
    }
}

/// Classification of a record by its header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// A definition record, binding a layout to a local message number.
    Definition {
        local: u8,
        /// Developer field definitions follow the standard ones.
        developer: bool,
    },
    /// A data record laid out per the definition bound to its local number.
    Data { local: u8 },
    /// A data record whose header carries a compressed timestamp.
    ///
    /// Compressed headers keep two bits for the local message number, so
    /// only local numbers 0 through 3 can appear here.
    CompressedData { local: u8, time_offset: u8 },
}

/// Classify a record header byte.
///
/// The classification decides how many subsequent bytes make up the record,
/// so it precedes any further consumption.
pub fn record_kind(r: u8) -> RecordKind {
    bitfield! {
        struct Header(u8) {
            [7] is_compressed,
        }
    }

    if Header(r).is_compressed() {
        bitfield! {
            struct CompressedHeader(u8) {
                [0..5] time_offset: u8,
                [5..7] local: u8,
            }
        }

        let header = CompressedHeader(r);

        RecordKind::CompressedData {
            local: header.local(),
            time_offset: header.time_offset(),
        }
    } else {
        bitfield! {
            struct NormalHeader(u8) {
                [0..4] local: u8,
                [5] is_developer,
                [6] is_definition,
            }
        }

        let header = NormalHeader(r);

        if header.is_definition() {
            RecordKind::Definition {
                local: header.local(),
                developer: header.is_developer(),
            }
        } else {
            RecordKind::Data {
                local: header.local(),
            }
        }
    }
}

impl RecordKind {
    /// Rebuild the header byte for this record kind.
    pub fn header_byte(self) -> u8 {
        match self {
            Self::Definition { local, developer } => {
                let developer = if developer { HDR_DEVELOPER_BIT } else { 0 };
                HDR_DEFINITION_BIT | developer | (local & 0x0F)
            }
            Self::Data { local } => local & 0x0F,
            Self::CompressedData { local, time_offset } => {
                HDR_COMPRESSED_BIT | (local & 0x03) << 5 | (time_offset & 0x1F)
            }
        }
    }
}
