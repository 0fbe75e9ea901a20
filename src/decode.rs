//! Streaming decoder.
//!
//! A [`DecodeSession`] is a pull-driven state machine: the caller feeds it
//! document bytes in chunks of any size, and decoding pauses at each
//! decoded message. All state lives in the session value, so independent
//! decodes run on independent sessions with nothing shared between them.
//!
//! The decoded message buffer is reused: each new message overwrites the
//! previous one. Callers needing a message beyond the next `read` call copy
//! it out first.

#[cfg(feature = "std")]
extern crate std;

use thiserror::Error;

use crate::{
    base::{self, BaseType},
    check,
    definition::{
        LocalMessageTable, MessageDefinition, MAX_DEV_FIELD_DEFS, MAX_FIELD_DEFS,
        MAX_MESSAGE_BYTES,
    },
    header::{
        self, FileHeader, FileHeaderError, RecordKind, BASE_HEADER_LEN, DATA_TYPE_TAG,
        EXTENDED_HEADER_LEN, SUPPORTED_PROTOCOL_MAJOR,
    },
};

/// Field number carrying a record's timestamp.
pub const TIMESTAMP_FIELD: u8 = 253;

/// Outcome of feeding bytes to a decode session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// All fed bytes were consumed; more are needed.
    Continue,
    /// A decoded message is ready in the session buffer.
    MessageAvailable,
    /// The trailing check value was reached (and verified, when enabled).
    EndOfFile,
}

/// An error decoding a document.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Malformed or non-FIT document header.
    #[error("Malformed file header: {0}")]
    MalformedHeader(#[from] FileHeaderError),
    /// Protocol major version above the supported range.
    #[error("Unsupported protocol version ({major}.{minor}).")]
    UnsupportedProtocolVersion { major: u8, minor: u8 },
    /// A record referenced a local message number outside the table.
    #[error("Local message number {0} is outside the table capacity.")]
    LocalMessageOutOfRange(u8),
    /// A data record referenced a local message number with no definition.
    #[error("Data record references unbound local message number {0}.")]
    UnboundLocalMessage(u8),
    /// A definition exceeded a fixed decoding capacity.
    #[error("Definition record exceeds a fixed capacity.")]
    DefinitionOverflow,
    /// Fewer record bytes remained than the bound definition requires.
    #[error("Record truncated.")]
    TruncatedRecord,
    /// Calculated and found CRC values do not match.
    #[error("Calculated ({calculated}) and found ({found}) CRC values do not match.")]
    ChecksumMismatch { found: u16, calculated: u16 },
    /// The document ended before the trailing check value.
    #[error("Unexpected end of input.")]
    UnexpectedEndOfInput,
}

/// Configuration for a decode session.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// Verify the trailing check value (and the header's own, when present)
    /// against the accumulated one.
    pub check_crc: bool,
    /// Require the header's file type marker to equal `.FIT`.
    pub check_data_type: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            check_crc: true,
            check_data_type: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum State {
    FileHeaderSize,
    FileHeaderBody,
    RecordHeader,
    Definition {
        local: u8,
        developer: bool,
        phase: DefPhase,
    },
    Data {
        local: u8,
        time_offset: Option<u8>,
    },
    TrailingCrc,
    EndOfFile,
}

#[derive(Clone, Copy, Debug)]
enum DefPhase {
    Fixed,
    Fields,
    DevCount,
    DevFields,
}

/// A streaming decode session.
///
/// The const parameter sets the local message table capacity; the protocol
/// default of sixteen suits normal documents.
pub struct DecodeSession<const LOCALS: usize = 16> {
    options: DecodeOptions,
    state: State,
    failure: Option<DecodeError>,
    crc: u16,
    header: Option<FileHeader>,
    data_bytes_left: u32,
    table: LocalMessageTable<LOCALS>,
    last_timestamp: Option<u32>,

    // Staging for the unit being accumulated: header, definition body, data
    // record, or trailing check value.
    stage: [u8; MAX_MESSAGE_BYTES],
    staged: usize,
    need: usize,

    // Most recently decoded message.
    message: [u8; MAX_MESSAGE_BYTES],
    message_len: usize,
    message_global: u16,
    message_local: u8,
    has_message: bool,
}

impl<const LOCALS: usize> Default for DecodeSession<LOCALS> {
    fn default() -> Self {
        Self::new(DecodeOptions::default())
    }
}

impl<const LOCALS: usize> DecodeSession<LOCALS> {
    /// Start a session expecting a document header.
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            state: State::FileHeaderSize,
            failure: None,
            crc: 0,
            header: None,
            data_bytes_left: 0,
            table: LocalMessageTable::default(),
            last_timestamp: None,
            stage: [0; MAX_MESSAGE_BYTES],
            staged: 0,
            need: 1,
            message: [0; MAX_MESSAGE_BYTES],
            message_len: 0,
            message_global: 0,
            message_local: 0,
            has_message: false,
        }
    }

    /// Feed bytes to the session.
    ///
    /// Returns the number of bytes consumed and the resulting status.
    /// Decoding pauses on [`DecodeStatus::MessageAvailable`]; call `read`
    /// again with the unconsumed tail to continue. Errors are terminal:
    /// every later call returns the same error.
    pub fn read(&mut self, data: &[u8]) -> Result<(usize, DecodeStatus), DecodeError> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        if matches!(self.state, State::EndOfFile) {
            return Ok((0, DecodeStatus::EndOfFile));
        }

        for (i, &byte) in data.iter().enumerate() {
            match self.step(byte) {
                Ok(None) => {}
                Ok(Some(status)) => return Ok((i + 1, status)),
                Err(error) => {
                    self.failure = Some(error);
                    return Err(error);
                }
            }
        }

        Ok((data.len(), DecodeStatus::Continue))
    }

    /// Declare the byte source exhausted.
    ///
    /// An error unless the document's trailing check value was reached.
    pub fn end_of_input(&self) -> Result<(), DecodeError> {
        match self.state {
            State::EndOfFile => Ok(()),
            _ => Err(self.failure.unwrap_or(DecodeError::UnexpectedEndOfInput)),
        }
    }

    /// The document header, once decoded.
    pub fn header(&self) -> Option<FileHeader> {
        self.header
    }

    /// The most recently decoded message.
    ///
    /// The returned view borrows the session's reused buffer and the
    /// definition that produced it; both are valid until the next `read`.
    pub fn message(&self) -> Option<Message<'_>> {
        if !self.has_message {
            return None;
        }
        let definition = self.table.lookup(self.message_local)?;
        Some(Message {
            global: self.message_global,
            data: &self.message[..self.message_len],
            definition,
        })
    }

    /// Overwrite omitted fields of the last decoded message from a template
    /// buffer laid out like the message.
    ///
    /// Only fields the device omitted (still holding their invalid marker)
    /// are overwritten, and only from template elements that are themselves
    /// not the invalid marker. Fields the device supplied are untouched.
    pub fn restore_fields(&mut self, template: &[u8]) {
        if !self.has_message {
            return;
        }
        let Some(definition) = self.table.lookup(self.message_local) else {
            return;
        };

        let mut offset = 0;
        for field in definition.fields() {
            let size = usize::from(field.size);
            let Some(kind) = field.kind() else {
                offset += size;
                continue;
            };

            let width = kind.width();
            let mut o = offset;
            while o + width <= offset + size {
                if o + width > self.message_len || o + width > template.len() {
                    return;
                }
                if kind.is_invalid(&self.message[o..o + width])
                    && !kind.is_invalid(&template[o..o + width])
                {
                    self.message[o..o + width].copy_from_slice(&template[o..o + width]);
                }
                o += width;
            }
            offset += size;
        }
    }

    fn step(&mut self, byte: u8) -> Result<Option<DecodeStatus>, DecodeError> {
        match self.state {
            State::FileHeaderSize => {
                self.crc = check::update(self.crc, byte);
                if byte < BASE_HEADER_LEN as u8 {
                    return Err(FileHeaderError::UnknownHeaderLength(byte).into());
                }
                self.stage[0] = byte;
                self.staged = 1;
                self.need = usize::from(byte);
                self.state = State::FileHeaderBody;
                Ok(None)
            }
            State::FileHeaderBody => {
                self.crc = check::update(self.crc, byte);
                self.push_stage(byte);
                if self.staged == self.need {
                    self.finish_file_header()?;
                }
                Ok(None)
            }
            State::RecordHeader => {
                self.crc = check::update(self.crc, byte);
                self.consume_record_byte(false)?;
                match header::record_kind(byte) {
                    RecordKind::Definition { local, developer } => {
                        self.check_local(local)?;
                        self.staged = 0;
                        self.need = 5;
                        self.state = State::Definition {
                            local,
                            developer,
                            phase: DefPhase::Fixed,
                        };
                        Ok(None)
                    }
                    RecordKind::Data { local } => self.start_data(local, None),
                    RecordKind::CompressedData { local, time_offset } => {
                        self.start_data(local, Some(time_offset))
                    }
                }
            }
            State::Definition {
                local,
                developer,
                phase,
            } => {
                self.crc = check::update(self.crc, byte);
                self.consume_record_byte(false)?;
                self.push_stage(byte);
                if self.staged < self.need {
                    return Ok(None);
                }

                match phase {
                    DefPhase::Fixed => {
                        let num_fields = usize::from(self.stage[4]);
                        if num_fields > MAX_FIELD_DEFS {
                            return Err(DecodeError::DefinitionOverflow);
                        }
                        if num_fields > 0 {
                            self.need += num_fields * 3;
                            self.state = State::Definition {
                                local,
                                developer,
                                phase: DefPhase::Fields,
                            };
                        } else {
                            self.finish_definition_fields(local, developer)?;
                        }
                    }
                    DefPhase::Fields => self.finish_definition_fields(local, developer)?,
                    DefPhase::DevCount => {
                        let num_dev_fields = usize::from(self.stage[self.staged - 1]);
                        if num_dev_fields > MAX_DEV_FIELD_DEFS {
                            return Err(DecodeError::DefinitionOverflow);
                        }
                        if num_dev_fields > 0 {
                            self.need += num_dev_fields * 3;
                            self.state = State::Definition {
                                local,
                                developer,
                                phase: DefPhase::DevFields,
                            };
                        } else {
                            self.bind_definition(local, developer)?;
                        }
                    }
                    DefPhase::DevFields => self.bind_definition(local, developer)?,
                }
                Ok(None)
            }
            State::Data { local, time_offset } => {
                self.crc = check::update(self.crc, byte);
                self.consume_record_byte(true)?;
                self.push_stage(byte);
                if self.staged < self.need {
                    return Ok(None);
                }
                self.finish_data(local, time_offset)?;
                self.record_boundary();
                Ok(Some(DecodeStatus::MessageAvailable))
            }
            State::TrailingCrc => {
                self.push_stage(byte);
                if self.staged < self.need {
                    return Ok(None);
                }
                let found = u16::from_le_bytes([self.stage[0], self.stage[1]]);
                if self.options.check_crc && found != self.crc {
                    return Err(DecodeError::ChecksumMismatch {
                        found,
                        calculated: self.crc,
                    });
                }
                self.state = State::EndOfFile;
                Ok(Some(DecodeStatus::EndOfFile))
            }
            State::EndOfFile => Ok(Some(DecodeStatus::EndOfFile)),
        }
    }

    fn push_stage(&mut self, byte: u8) {
        self.stage[self.staged] = byte;
        self.staged += 1;
    }

    fn check_local(&self, local: u8) -> Result<(), DecodeError> {
        if usize::from(local) >= LOCALS {
            return Err(DecodeError::LocalMessageOutOfRange(local));
        }
        Ok(())
    }

    /// Count a record byte against the header's declared payload size.
    fn consume_record_byte(&mut self, in_data: bool) -> Result<(), DecodeError> {
        if self.data_bytes_left == 0 {
            return Err(if in_data {
                DecodeError::TruncatedRecord
            } else {
                DecodeError::UnexpectedEndOfInput
            });
        }
        self.data_bytes_left -= 1;
        Ok(())
    }

    fn record_boundary(&mut self) {
        self.staged = 0;
        if self.data_bytes_left == 0 {
            self.need = 2;
            self.state = State::TrailingCrc;
        } else {
            self.state = State::RecordHeader;
        }
    }

    fn finish_file_header(&mut self) -> Result<(), DecodeError> {
        let fixed: [u8; BASE_HEADER_LEN] = self.stage[..BASE_HEADER_LEN].try_into().unwrap();
        let header = FileHeader::parse(fixed);

        if self.options.check_data_type && header.data_type != DATA_TYPE_TAG {
            return Err(FileHeaderError::NotFitData.into());
        }
        if header.protocol_major() > SUPPORTED_PROTOCOL_MAJOR {
            return Err(DecodeError::UnsupportedProtocolVersion {
                major: header.protocol_major(),
                minor: header.protocol_minor(),
            });
        }
        if self.options.check_crc && self.staged >= EXTENDED_HEADER_LEN {
            let found = u16::from_le_bytes([self.stage[12], self.stage[13]]);
            let calculated = check::compute(0, &self.stage[..BASE_HEADER_LEN]);
            // A zeroed header check value means the producer skipped it.
            if found != 0 && found != calculated {
                return Err(DecodeError::ChecksumMismatch { found, calculated });
            }
        }

        self.data_bytes_left = header.data_size;
        self.header = Some(header);
        self.record_boundary();
        Ok(())
    }

    /// Grow the staging target through the developer block, or bind.
    fn finish_definition_fields(&mut self, local: u8, developer: bool) -> Result<(), DecodeError> {
        if developer {
            self.need += 1;
            self.state = State::Definition {
                local,
                developer,
                phase: DefPhase::DevCount,
            };
            Ok(())
        } else {
            self.bind_definition(local, developer)
        }
    }

    fn bind_definition(&mut self, local: u8, developer: bool) -> Result<(), DecodeError> {
        let definition = MessageDefinition::parse(&self.stage[..self.staged], developer)
            .map_err(|_| DecodeError::DefinitionOverflow)?;
        self.table
            .bind(local, definition)
            .ok_or(DecodeError::LocalMessageOutOfRange(local))?;
        self.record_boundary();
        Ok(())
    }

    /// Stage a data record: validate the local number, size it from the
    /// bound definition, and move to the data-collecting state.
    fn start_data(
        &mut self,
        local: u8,
        time_offset: Option<u8>,
    ) -> Result<Option<DecodeStatus>, DecodeError> {
        self.check_local(local)?;
        let size = self
            .table
            .size_of(local)
            .ok_or(DecodeError::UnboundLocalMessage(local))?;
        self.staged = 0;
        self.need = size as usize;
        self.state = State::Data { local, time_offset };
        Ok(None)
    }

    fn finish_data(&mut self, local: u8, time_offset: Option<u8>) -> Result<(), DecodeError> {
        let Some(definition) = self.table.lookup(local) else {
            return Err(DecodeError::UnboundLocalMessage(local));
        };

        let len = decode_record(definition, &self.stage[..self.staged], &mut self.message)?;

        // Track the rolling timestamp, and reconstruct it for compressed
        // records: the five-bit offset replaces the low bits of the last
        // full timestamp, wrapping forward by 32 when it would run
        // backward.
        let timestamp = definition
            .locate(TIMESTAMP_FIELD)
            .filter(|(_, f)| f.size >= 4 && f.kind().is_some_and(|k| k.width() == 4));
        match time_offset {
            None => {
                if let Some((offset, field)) = timestamp {
                    if let Some(kind) = field.kind() {
                        let value = &self.message[offset..offset + 4];
                        if !kind.is_invalid(value) {
                            self.last_timestamp = Some(base::read_native(value) as u32);
                        }
                    }
                }
            }
            Some(offset5) => {
                if let Some(last) = self.last_timestamp {
                    let offset5 = u32::from(offset5);
                    let reconstructed = if offset5 >= last & 0x1F {
                        (last & !0x1F) + offset5
                    } else {
                        (last & !0x1F) + offset5 + 0x20
                    };
                    self.last_timestamp = Some(reconstructed);
                    if let Some((offset, _)) = timestamp {
                        base::write_native(
                            u64::from(reconstructed),
                            &mut self.message[offset..offset + 4],
                        );
                    }
                }
            }
        }

        self.message_len = len;
        self.message_global = definition.global();
        self.message_local = local;
        self.has_message = true;
        Ok(())
    }
}

/// A decoded message: its global number, value buffer, and the layout that
/// produced it.
#[derive(Clone, Copy, Debug)]
pub struct Message<'a> {
    global: u16,
    data: &'a [u8],
    definition: &'a MessageDefinition,
}

impl<'a> Message<'a> {
    /// The global message number.
    pub fn global(&self) -> u16 {
        self.global
    }

    /// Field values in definition order, native byte order, developer field
    /// bytes appended last.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The definition the message was decoded under.
    pub fn definition(&self) -> &'a MessageDefinition {
        self.definition
    }

    /// A standard field's bytes, by field number.
    pub fn field(&self, number: u8) -> Option<&'a [u8]> {
        let (offset, field) = self.definition.locate(number)?;
        self.data.get(offset..offset + usize::from(field.size))
    }

    /// Copy the message out of the session buffer.
    ///
    /// _Requires Cargo feature `std`._
    #[cfg(feature = "std")]
    pub fn to_owned(&self) -> MessageBuf {
        MessageBuf {
            global: self.global,
            data: self.data.to_vec(),
        }
    }
}

/// An owned copy of a decoded message.
///
/// _Requires Cargo feature `std`._
#[cfg(feature = "std")]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageBuf {
    pub global: u16,
    pub data: std::vec::Vec<u8>,
}

/// Decode one data record's bytes into native-order values, laid out field
/// by field in definition order. Returns the bytes written.
///
/// Values are stored by definition order, not field number; random access
/// by field number goes through [`MessageDefinition::locate`]. `out` must
/// hold the definition's total size.
pub fn decode_record(
    definition: &MessageDefinition,
    record: &[u8],
    out: &mut [u8],
) -> Result<usize, DecodeError> {
    let total = definition.total_size();
    if record.len() < total || out.len() < total {
        return Err(DecodeError::TruncatedRecord);
    }
    transpose_record(definition, record, out);
    Ok(total)
}

/// Copy one record between its declared byte order and the build
/// architecture's, element by element. Its own inverse.
pub(crate) fn transpose_record(definition: &MessageDefinition, src: &[u8], out: &mut [u8]) {
    let swap = definition.is_little_endian() != cfg!(target_endian = "little");

    let mut i = 0;
    for field in definition.fields() {
        let size = usize::from(field.size);
        let width = field.kind().map_or(1, BaseType::width);

        if swap && width > 1 {
            let mut o = i;
            while o + width <= i + size {
                for (d, s) in out[o..o + width].iter_mut().zip(src[o..o + width].iter().rev()) {
                    *d = *s;
                }
                o += width;
            }
            // A size that is not a multiple of the width leaves a remainder
            // with no element to swap; it passes through untouched.
            out[o..i + size].copy_from_slice(&src[o..i + size]);
        } else {
            out[i..i + size].copy_from_slice(&src[i..i + size]);
        }
        i += size;
    }

    // Developer field bytes pass through untouched; their types are the
    // caller's to resolve.
    out[i..definition.total_size()].copy_from_slice(&src[i..definition.total_size()]);
}
