//! Random access into complete documents.
//!
//! Locates a record by global message number (and optionally by message
//! index) without decoding field values: only each record's total size is
//! tracked, so the scan advances in a handful of reads per record.

use crate::header::{self, RecordKind};

/// Field number carrying a message's index within its type.
pub const MESSAGE_INDEX_FIELD: u8 = 254;

/// Mask selecting the index part of a message index value; the high bits
/// are flags.
pub const MESSAGE_INDEX_MASK: u16 = 0x0FFF;

/// Local message table capacity assumed by the scan.
const LOCALS: usize = 16;

/// A located data record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Found {
    /// Local message number the record was bound to.
    pub local: u8,
    /// Offset of the record's body (past its header byte), relative to the
    /// start of the record section.
    pub offset: u32,
}

/// Scan a document's record section for a data record of a global message
/// number.
///
/// `read` copies document bytes from an offset into a buffer, returning how
/// many it could; offset zero is the first record byte, after the document
/// header. With `message_index` requested, records are matched against
/// their message index field when their definition declares one, and
/// counted from zero in encounter order otherwise.
///
/// Returns `None` when the document ends (or a read falls short), or when a
/// data record references a local message number that was never bound.
pub fn lookup_message(
    mut read: impl FnMut(u32, &mut [u8]) -> usize,
    global: u16,
    message_index: Option<u16>,
) -> Option<Found> {
    let mut globals = [None::<u16>; LOCALS];
    let mut sizes = [0u32; LOCALS];
    let mut little_endian = [true; LOCALS];
    let mut index_offsets = [None::<u32>; LOCALS];
    let mut counted = None::<u16>;

    let mut offset: u32 = 0;

    loop {
        let header: [u8; 1] = read_exact(&mut read, offset)?;
        offset += 1;

        match header::record_kind(header[0]) {
            RecordKind::Definition { local, developer } => {
                let local = usize::from(local);

                let fixed: [u8; 5] = read_exact(&mut read, offset)?;
                offset += 5;

                let le = fixed[1] == 0;
                let bound = if le {
                    u16::from_le_bytes([fixed[2], fixed[3]])
                } else {
                    u16::from_be_bytes([fixed[2], fixed[3]])
                };

                let mut size = 0u32;
                let mut index_offset = None;
                for _ in 0..fixed[4] {
                    let field: [u8; 3] = read_exact(&mut read, offset)?;
                    offset += 3;
                    if field[0] == MESSAGE_INDEX_FIELD {
                        index_offset = Some(size);
                    }
                    size += u32::from(field[1]);
                }

                if developer {
                    let count: [u8; 1] = read_exact(&mut read, offset)?;
                    offset += 1;
                    for _ in 0..count[0] {
                        let field: [u8; 3] = read_exact(&mut read, offset)?;
                        offset += 3;
                        size += u32::from(field[1]);
                    }
                }

                globals[local] = Some(bound);
                sizes[local] = size;
                little_endian[local] = le;
                index_offsets[local] = index_offset;
            }
            RecordKind::Data { local } | RecordKind::CompressedData { local, .. } => {
                let local = usize::from(local);
                let bound = globals[local]?;

                if bound == global {
                    match message_index {
                        None => {
                            return Some(Found {
                                local: local as u8,
                                offset,
                            });
                        }
                        Some(want) => {
                            let current = if let Some(index_offset) = index_offsets[local] {
                                let raw: [u8; 2] = read_exact(&mut read, offset + index_offset)?;
                                if little_endian[local] {
                                    u16::from_le_bytes(raw)
                                } else {
                                    u16::from_be_bytes(raw)
                                }
                            } else {
                                let next = counted.map_or(0, |c| c.wrapping_add(1));
                                counted = Some(next);
                                next
                            };

                            if current & MESSAGE_INDEX_MASK == want & MESSAGE_INDEX_MASK {
                                return Some(Found {
                                    local: local as u8,
                                    offset,
                                });
                            }
                        }
                    }
                }

                offset += sizes[local];
            }
        }
    }
}

/// Read an exact number of bytes from an offset, or give up.
fn read_exact<const N: usize>(
    read: &mut impl FnMut(u32, &mut [u8]) -> usize,
    offset: u32,
) -> Option<[u8; N]> {
    let mut buf = [0; N];
    (read(offset, &mut buf) == N).then_some(buf)
}
