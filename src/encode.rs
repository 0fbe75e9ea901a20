//! Encoder writing complete documents.
//!
//! _Requires Cargo feature `std`._
//!
//! An [`EncodeSession`] mirrors the decoder's framing: a placeholder header
//! up front, definition records binding layouts to local message numbers,
//! data records against those bindings, and a trailing check value over the
//! finished header and every record byte. The sink must support seeking and
//! reading back, as the header is patched and the check value computed once
//! the payload size is known.

extern crate std;

use std::io::{Read, Seek, SeekFrom, Write};

use thiserror::Error;
use zerocopy::IntoBytes;

use crate::{
    check,
    decode::transpose_record,
    definition::{DefinitionOverflow, LocalMessageTable, MessageDefinition, MAX_MESSAGE_BYTES},
    header::{RawFileHeader, RecordKind, DATA_TYPE_TAG, EXTENDED_HEADER_LEN},
};

/// Protocol version written into document headers (major 2, minor 0).
const PROTOCOL_VERSION: u8 = 0x20;

/// Profile version written into document headers.
const PROFILE_VERSION: u16 = 152;

/// An error while encoding a document.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// An error from the supplied sink.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A message was written for a local number with no definition.
    #[error("No definition bound to local message number {0}.")]
    UnboundLocalMessage(u8),
    /// A local message number outside the table, or not encodable in a
    /// record header.
    #[error("Local message number {0} is outside the table capacity.")]
    LocalMessageOutOfRange(u8),
    /// A value buffer does not match the bound definition's size.
    #[error("Value buffer is {found} bytes where the definition requires {expected}.")]
    WrongMessageLength { expected: usize, found: usize },
    /// A definition exceeded a fixed capacity.
    #[error("Definition record exceeds a fixed capacity.")]
    DefinitionOverflow(#[from] DefinitionOverflow),
}

/// An encode session over a seekable sink.
pub struct EncodeSession<S: Read + Write + Seek, const LOCALS: usize = 16> {
    sink: S,
    table: LocalMessageTable<LOCALS>,
}

impl<S: Read + Write + Seek, const LOCALS: usize> EncodeSession<S, LOCALS> {
    /// Start a document, writing a placeholder header to be patched on
    /// close.
    pub fn open(mut sink: S) -> Result<Self, EncodeError> {
        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&[0; EXTENDED_HEADER_LEN])?;
        Ok(Self {
            sink,
            table: LocalMessageTable::default(),
        })
    }

    /// Write a definition record, binding its layout to a local message
    /// number for subsequent [`write_message`](Self::write_message) calls.
    ///
    /// Rebinding a local number mid-document is permitted, exactly as on
    /// the decode side.
    pub fn write_definition(
        &mut self,
        local: u8,
        definition: &MessageDefinition,
    ) -> Result<(), EncodeError> {
        if local > 0x0F {
            return Err(EncodeError::LocalMessageOutOfRange(local));
        }

        let developer = !definition.dev_fields().is_empty();
        let header = RecordKind::Definition { local, developer }.header_byte();
        self.sink.write_all(&[header])?;

        let global = if definition.is_little_endian() {
            definition.global().to_le_bytes()
        } else {
            definition.global().to_be_bytes()
        };
        let architecture = if definition.is_little_endian() { 0 } else { 1 };
        self.sink.write_all(&[0, architecture])?;
        self.sink.write_all(&global)?;
        self.sink.write_all(&[definition.fields().len() as u8])?;

        for field in definition.fields() {
            self.sink
                .write_all(&[field.number, field.size, field.base_type])?;
        }

        if developer {
            self.sink.write_all(&[definition.dev_fields().len() as u8])?;
            for field in definition.dev_fields() {
                self.sink
                    .write_all(&[field.number, field.size, field.developer_index])?;
            }
        }

        self.table
            .bind(local, definition.clone())
            .ok_or(EncodeError::LocalMessageOutOfRange(local))?;
        Ok(())
    }

    /// Write a data record from a native-order value buffer laid out per
    /// the definition bound to the local message number.
    ///
    /// Omitted fields hold their base type's invalid marker (see
    /// [`MessageDefinition::init_message`]); values are emitted in the
    /// definition's declared byte order.
    pub fn write_message(&mut self, local: u8, values: &[u8]) -> Result<(), EncodeError> {
        let Some(definition) = self.table.lookup(local) else {
            return Err(EncodeError::UnboundLocalMessage(local));
        };

        let total = definition.total_size();
        if values.len() != total {
            return Err(EncodeError::WrongMessageLength {
                expected: total,
                found: values.len(),
            });
        }

        let mut record = [0; MAX_MESSAGE_BYTES];
        transpose_record(definition, values, &mut record);

        let header = RecordKind::Data { local }.header_byte();
        self.sink.write_all(&[header])?;
        self.sink.write_all(&record[..total])?;
        Ok(())
    }

    /// Finish the document: patch the header with the payload size and its
    /// own check value, then append the file check value computed over the
    /// header and every record byte. Returns the sink.
    pub fn close(mut self) -> Result<S, EncodeError> {
        let end = self.sink.seek(SeekFrom::End(0))?;
        let data_size = end - EXTENDED_HEADER_LEN as u64;

        let header = RawFileHeader {
            header_size: EXTENDED_HEADER_LEN as u8,
            protocol_version: PROTOCOL_VERSION,
            profile_version: PROFILE_VERSION.to_le_bytes(),
            data_size: (data_size as u32).to_le_bytes(),
            data_type: DATA_TYPE_TAG,
        };
        let header_crc = check::compute(0, header.as_bytes());

        self.sink.seek(SeekFrom::Start(0))?;
        self.sink.write_all(header.as_bytes())?;
        self.sink.write_all(&header_crc.to_le_bytes())?;

        // The trailing check value covers the finished header, so stream
        // the document back through the accumulator before appending.
        self.sink.seek(SeekFrom::Start(0))?;
        let mut crc = 0;
        let mut remaining = end;
        let mut buf = [0; 256];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.sink.read(&mut buf[..want])?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            crc = check::compute(crc, &buf[..n]);
            remaining -= n as u64;
        }

        self.sink.seek(SeekFrom::End(0))?;
        self.sink.write_all(&crc.to_le_bytes())?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}
