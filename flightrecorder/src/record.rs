//! Declarative fixed-layout binary record codec.
//!
//! Instrument protocols exchange small fixed-layout structures (status
//! blocks, track summaries, position fixes). Instead of hand-rolling a
//! reader per structure, each one is described as a static table of
//! [`FieldSpec`]s and decoded by a single generic routine:
//!
//! ```
//! use flightrecorder::record::{FieldKind, FieldSpec, RecordLayout};
//!
//! static STATUS: RecordLayout = RecordLayout::new(&[
//!     FieldSpec::be(FieldKind::U8, Some("message_id")),
//!     FieldSpec::be(FieldKind::U32, Some("device_id")),
//!     FieldSpec::be(FieldKind::U16, Some("non_empty_sectors")),
//! ]);
//!
//! let record = STATUS.decode(&[0x05, 0, 0, 0x12, 0x34, 0x00, 0x07]).unwrap();
//! assert_eq!(record.unsigned("device_id").unwrap(), 0x1234);
//! ```
//!
//! Fields with `name == None` are padding: decoded and discarded. A layout
//! may mix endianness between fields (some wire formats use a big-endian
//! header in front of a little-endian body).

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Byte order of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Width and signedness of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Fixed-length byte string.
    Bytes(usize),
}

impl FieldKind {
    /// Encoded width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::Bytes(n) => n,
        }
    }
}

/// One field of a [`RecordLayout`].
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Width and signedness.
    pub kind: FieldKind,
    /// Byte order (ignored for single-byte and byte-string fields).
    pub endian: Endian,
    /// Field name; `None` marks padding.
    pub name: Option<&'static str>,
}

impl FieldSpec {
    /// A big-endian field.
    #[must_use]
    pub const fn be(kind: FieldKind, name: Option<&'static str>) -> Self {
        Self {
            kind,
            endian: Endian::Big,
            name,
        }
    }

    /// A little-endian field.
    #[must_use]
    pub const fn le(kind: FieldKind, name: Option<&'static str>) -> Self {
        Self {
            kind,
            endian: Endian::Little,
            name,
        }
    }
}

/// An ordered sequence of fields describing one wire structure.
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    fields: &'static [FieldSpec],
}

impl RecordLayout {
    /// Build a layout from a static field table.
    #[must_use]
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self { fields }
    }

    /// Total encoded width in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.kind.width()).sum()
    }

    /// Whether every field is named (a prerequisite for [`Self::encode`]).
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.fields.iter().all(|f| f.name.is_some())
    }

    /// Decode the first [`Self::size`] bytes of `buf` into a [`Record`].
    ///
    /// Trailing bytes are ignored; a short buffer is an error.
    pub fn decode(&self, buf: &[u8]) -> Result<Record> {
        let size = self.size();
        if buf.len() < size {
            return Err(Error::Format(format!(
                "buffer too short for layout: {} < {size} bytes",
                buf.len()
            )));
        }
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for spec in self.fields {
            let width = spec.kind.width();
            let raw = &buf[offset..offset + width];
            offset += width;
            let Some(name) = spec.name else {
                continue; // padding
            };
            let value = match (spec.kind, spec.endian) {
                (FieldKind::U8, _) => FieldValue::Unsigned(u32::from(raw[0])),
                (FieldKind::I8, _) => FieldValue::Signed(i32::from(raw[0] as i8)),
                (FieldKind::U16, Endian::Big) => {
                    FieldValue::Unsigned(u32::from(BigEndian::read_u16(raw)))
                }
                (FieldKind::U16, Endian::Little) => {
                    FieldValue::Unsigned(u32::from(LittleEndian::read_u16(raw)))
                }
                (FieldKind::I16, Endian::Big) => {
                    FieldValue::Signed(i32::from(BigEndian::read_i16(raw)))
                }
                (FieldKind::I16, Endian::Little) => {
                    FieldValue::Signed(i32::from(LittleEndian::read_i16(raw)))
                }
                (FieldKind::U32, Endian::Big) => FieldValue::Unsigned(BigEndian::read_u32(raw)),
                (FieldKind::U32, Endian::Little) => {
                    FieldValue::Unsigned(LittleEndian::read_u32(raw))
                }
                (FieldKind::I32, Endian::Big) => FieldValue::Signed(BigEndian::read_i32(raw)),
                (FieldKind::I32, Endian::Little) => {
                    FieldValue::Signed(LittleEndian::read_i32(raw))
                }
                (FieldKind::Bytes(_), _) => FieldValue::Bytes(raw.to_vec()),
            };
            fields.push((name, value));
        }
        Ok(Record { fields })
    }

    /// Encode `record` back to bytes.
    ///
    /// Only layouts without padding can round-trip; a padding field has no
    /// value to write back.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        if !self.is_lossless() {
            return Err(Error::Format(
                "cannot encode a layout with padding fields".into(),
            ));
        }
        let mut buf = Vec::with_capacity(self.size());
        for spec in self.fields {
            let name = spec.name.unwrap_or_default();
            let value = record
                .get(name)
                .ok_or_else(|| Error::Format(format!("missing field {name:?}")))?;
            encode_field(&mut buf, spec, name, value)?;
        }
        Ok(buf)
    }
}

fn encode_field(
    buf: &mut Vec<u8>,
    spec: &FieldSpec,
    name: &str,
    value: &FieldValue,
) -> Result<()> {
    let mut scratch = [0u8; 4];
    match (spec.kind, value) {
        (FieldKind::U8, FieldValue::Unsigned(v)) => {
            let v = u8::try_from(*v)
                .map_err(|_| Error::Format(format!("{name}: {v} does not fit in u8")))?;
            buf.push(v);
        }
        (FieldKind::I8, FieldValue::Signed(v)) => {
            let v = i8::try_from(*v)
                .map_err(|_| Error::Format(format!("{name}: {v} does not fit in i8")))?;
            buf.push(v as u8);
        }
        (FieldKind::U16, FieldValue::Unsigned(v)) => {
            let v = u16::try_from(*v)
                .map_err(|_| Error::Format(format!("{name}: {v} does not fit in u16")))?;
            write_u16(&mut scratch, spec.endian, v);
            buf.extend_from_slice(&scratch[..2]);
        }
        (FieldKind::I16, FieldValue::Signed(v)) => {
            let v = i16::try_from(*v)
                .map_err(|_| Error::Format(format!("{name}: {v} does not fit in i16")))?;
            write_u16(&mut scratch, spec.endian, v as u16);
            buf.extend_from_slice(&scratch[..2]);
        }
        (FieldKind::U32, FieldValue::Unsigned(v)) => {
            write_u32(&mut scratch, spec.endian, *v);
            buf.extend_from_slice(&scratch);
        }
        (FieldKind::I32, FieldValue::Signed(v)) => {
            write_u32(&mut scratch, spec.endian, *v as u32);
            buf.extend_from_slice(&scratch);
        }
        (FieldKind::Bytes(n), FieldValue::Bytes(b)) => {
            if b.len() != n {
                return Err(Error::Format(format!(
                    "{name}: expected {n} bytes, got {}",
                    b.len()
                )));
            }
            buf.extend_from_slice(b);
        }
        _ => {
            return Err(Error::Format(format!(
                "{name}: value does not match field kind {:?}",
                spec.kind
            )));
        }
    }
    Ok(())
}

fn write_u16(scratch: &mut [u8; 4], endian: Endian, v: u16) {
    match endian {
        Endian::Big => BigEndian::write_u16(&mut scratch[..2], v),
        Endian::Little => LittleEndian::write_u16(&mut scratch[..2], v),
    }
}

fn write_u32(scratch: &mut [u8; 4], endian: Endian, v: u32) {
    match endian {
        Endian::Big => BigEndian::write_u32(scratch, v),
        Endian::Little => LittleEndian::write_u32(scratch, v),
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Unsigned integer of 1, 2 or 4 bytes.
    Unsigned(u32),
    /// Signed integer of 1, 2 or 4 bytes.
    Signed(i32),
    /// Fixed-length byte string.
    Bytes(Vec<u8>),
}

/// An immutable mapping from field name to decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Record {
    /// Build a record by hand, typically for [`RecordLayout::encode`].
    #[must_use]
    pub fn from_fields(fields: Vec<(&'static str, FieldValue)>) -> Self {
        Self { fields }
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Fetch an unsigned integer field.
    pub fn unsigned(&self, name: &str) -> Result<u32> {
        match self.get(name) {
            Some(FieldValue::Unsigned(v)) => Ok(*v),
            Some(_) => Err(Error::Format(format!("field {name:?} is not unsigned"))),
            None => Err(Error::Format(format!("no field {name:?}"))),
        }
    }

    /// Fetch a signed integer field.
    pub fn signed(&self, name: &str) -> Result<i32> {
        match self.get(name) {
            Some(FieldValue::Signed(v)) => Ok(*v),
            Some(FieldValue::Unsigned(v)) => i32::try_from(*v)
                .map_err(|_| Error::Format(format!("field {name:?} out of i32 range"))),
            Some(FieldValue::Bytes(_)) => {
                Err(Error::Format(format!("field {name:?} is not an integer")))
            }
            None => Err(Error::Format(format!("no field {name:?}"))),
        }
    }

    /// Fetch a byte-string field.
    pub fn bytes(&self, name: &str) -> Result<&[u8]> {
        match self.get(name) {
            Some(FieldValue::Bytes(b)) => Ok(b),
            Some(_) => Err(Error::Format(format!("field {name:?} is not bytes"))),
            None => Err(Error::Format(format!("no field {name:?}"))),
        }
    }
}
