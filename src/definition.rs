//! Record layouts and the local message table.

use thiserror::Error;
use tinyvec::ArrayVec;
use zerocopy::FromBytes;

use crate::base::BaseType;

/// Most standard fields a single definition may declare.
pub const MAX_FIELD_DEFS: usize = 64;

/// Most developer fields a single definition may declare.
pub const MAX_DEV_FIELD_DEFS: usize = 16;

/// Largest total record size a definition may declare, in bytes.
///
/// Also the size of a session's reused message buffer.
pub const MAX_MESSAGE_BYTES: usize = 512;

/// A definition exceeded one of the fixed capacities above.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("Definition record exceeds a fixed capacity.")]
pub struct DefinitionOverflow;

/// A standard field declared by a definition record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldDef {
    /// Field number within the owning message type.
    pub number: u8,
    /// Field size in bytes; a multiple of the base type's width for arrays.
    pub size: u8,
    /// Wire code of the base type, endian-sensitivity bit included.
    pub base_type: u8,
}

impl FieldDef {
    /// Declare a field of a base type.
    pub fn new(number: u8, size: u8, base_type: BaseType) -> Self {
        Self {
            number,
            size,
            base_type: base_type.wire_code(),
        }
    }

    /// The field's base type, if the code is known.
    pub fn kind(&self) -> Option<BaseType> {
        BaseType::from_wire(self.base_type)
    }
}

/// A developer field declared by a definition record.
///
/// The field number is drawn from the namespace selected by the developer
/// data index; resolving it against the describing messages decoded earlier
/// in the document is the caller's concern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DevFieldDef {
    pub number: u8,
    pub size: u8,
    pub developer_index: u8,
}

#[repr(C, packed)]
#[derive(FromBytes)]
struct RawDefinition {
    _reserved: u8,
    architecture: u8,
    global: [u8; 2],
    num_fields: u8,
}

/// The record layout bound to a local message number.
///
/// Immutable once parsed; a session replaces the whole binding when a new
/// definition record arrives for the same local number.
#[derive(Clone, Debug, Default)]
pub struct MessageDefinition {
    global: u16,
    little_endian: bool,
    data_size: u16,
    dev_data_size: u16,
    fields: ArrayVec<[FieldDef; MAX_FIELD_DEFS]>,
    dev_fields: ArrayVec<[DevFieldDef; MAX_DEV_FIELD_DEFS]>,
}

impl MessageDefinition {
    /// Start a definition for a global message number, declaring the byte
    /// order its data records are stored in.
    pub fn new(global: u16, little_endian: bool) -> Self {
        Self {
            global,
            little_endian,
            ..Self::default()
        }
    }

    /// Decode a definition record body (fixed bytes, field definitions, and
    /// the developer field block when `developer` is set).
    pub(crate) fn parse(body: &[u8], developer: bool) -> Result<Self, DefinitionOverflow> {
        let fixed: [u8; 5] = body[..5].try_into().unwrap();
        let RawDefinition {
            architecture,
            global,
            num_fields,
            ..
        } = zerocopy::transmute!(fixed);

        let little_endian = architecture == 0;
        let global = if little_endian {
            u16::from_le_bytes(global)
        } else {
            u16::from_be_bytes(global)
        };

        let mut definition = Self::new(global, little_endian);

        let mut i = 5;
        for _ in 0..num_fields {
            definition.push_field(FieldDef {
                number: body[i],
                size: body[i + 1],
                base_type: body[i + 2],
            })?;
            i += 3;
        }

        if developer {
            let num_dev_fields = body[i];
            i += 1;

            for _ in 0..num_dev_fields {
                definition.push_dev_field(DevFieldDef {
                    number: body[i],
                    size: body[i + 1],
                    developer_index: body[i + 2],
                })?;
                i += 3;
            }
        }

        Ok(definition)
    }

    /// Append a standard field to the layout.
    pub fn push_field(&mut self, field: FieldDef) -> Result<(), DefinitionOverflow> {
        let data_size = self.data_size + u16::from(field.size);
        if usize::from(data_size) + usize::from(self.dev_data_size) > MAX_MESSAGE_BYTES {
            return Err(DefinitionOverflow);
        }
        if self.fields.try_push(field).is_some() {
            return Err(DefinitionOverflow);
        }
        self.data_size = data_size;
        Ok(())
    }

    /// Append a developer field to the layout.
    pub fn push_dev_field(&mut self, field: DevFieldDef) -> Result<(), DefinitionOverflow> {
        let dev_data_size = self.dev_data_size + u16::from(field.size);
        if usize::from(self.data_size) + usize::from(dev_data_size) > MAX_MESSAGE_BYTES {
            return Err(DefinitionOverflow);
        }
        if self.dev_fields.try_push(field).is_some() {
            return Err(DefinitionOverflow);
        }
        self.dev_data_size = dev_data_size;
        Ok(())
    }

    /// The global message number data records decode as.
    pub fn global(&self) -> u16 {
        self.global
    }

    /// Whether data record values are stored little-endian.
    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// The declared standard fields, in record order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// The declared developer fields, in record order.
    pub fn dev_fields(&self) -> &[DevFieldDef] {
        &self.dev_fields
    }

    /// Total bytes of one data record's standard fields.
    pub fn data_size(&self) -> usize {
        usize::from(self.data_size)
    }

    /// Total bytes of one data record, developer fields included.
    pub fn total_size(&self) -> usize {
        usize::from(self.data_size) + usize::from(self.dev_data_size)
    }

    /// Locate a standard field by number: its byte offset into a record and
    /// its declaration.
    pub fn locate(&self, number: u8) -> Option<(usize, FieldDef)> {
        let mut offset = 0;
        for field in self.fields.iter() {
            if field.number == number {
                return Some((offset, *field));
            }
            offset += usize::from(field.size);
        }
        None
    }

    /// Fill a message value buffer with every field's invalid marker.
    ///
    /// `out` must hold at least [`total_size`](Self::total_size) bytes.
    pub fn init_message(&self, out: &mut [u8]) {
        let mut offset = 0;
        for field in self.fields.iter() {
            let size = usize::from(field.size);
            match field.kind() {
                Some(kind) => {
                    let width = kind.width();
                    let mut o = offset;
                    while o + width <= offset + size {
                        kind.fill_invalid(&mut out[o..o + width]);
                        o += width;
                    }
                    out[o..offset + size].fill(0xFF);
                }
                None => out[offset..offset + size].fill(0xFF),
            }
            offset += size;
        }
        out[offset..self.total_size()].fill(0xFF);
    }
}

/// Bindings from local message numbers to their active definitions.
///
/// A new binding silently replaces the old one: devices redefine local
/// numbers mid-document and the old layout simply stops applying.
#[derive(Clone, Debug)]
pub struct LocalMessageTable<const CAP: usize = 16> {
    slots: [Option<MessageDefinition>; CAP],
}

impl<const CAP: usize> Default for LocalMessageTable<CAP> {
    fn default() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }
}

impl<const CAP: usize> LocalMessageTable<CAP> {
    /// Bind a definition to a local message number, replacing any previous
    /// binding. `None` if the number is outside the table.
    pub fn bind(&mut self, local: u8, definition: MessageDefinition) -> Option<()> {
        *self.slots.get_mut(usize::from(local))? = Some(definition);
        Some(())
    }

    /// The definition bound to a local message number, if any.
    pub fn lookup(&self, local: u8) -> Option<&MessageDefinition> {
        self.slots.get(usize::from(local))?.as_ref()
    }

    /// Total data record size bound to a local message number, if any.
    pub fn size_of(&self, local: u8) -> Option<u32> {
        self.lookup(local).map(|d| d.total_size() as u32)
    }
}
