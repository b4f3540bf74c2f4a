//! Minimal protobuf wire-format scanning.
//!
//! Only the two wire types the OSM PBF container needs are understood:
//! varints and length-delimited fields. Nothing here knows a schema; callers
//! pick out the field numbers they care about and re-scan `Bytes` payloads
//! when they expect a nested message.
//!
//! ## Algorithm Overview
//!
//! 1. Read a varint tag; `field = tag >> 3`, `wire type = tag & 0x7`
//! 2. Varint: read one more varint as the value
//! 3. Length-delimited: read a varint length, slice that many bytes
//! 4. Anything else, or a short read, ends the sequence
//!
//! ```
//! use mapstamp_core::proto::{FieldValue, ProtoScanner};
//!
//! // field 3 = 150, field 1 = "hi"
//! let data = [0x18, 0x96, 0x01, 0x0A, 0x02, b'h', b'i'];
//! let fields: Vec<_> = ProtoScanner::new(&data).collect();
//! assert_eq!(fields[0].number, 3);
//! assert_eq!(fields[0].value, FieldValue::Varint(150));
//! assert_eq!(fields[1].value, FieldValue::Bytes(b"hi"));
//! ```

mod wire;

use tracing::trace;

pub use wire::{decode_varint, zigzag_decode, ByteCursor, WireType};

/// Value carried by a scanned field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// A varint-encoded scalar
    Varint(u64),
    /// A length-delimited payload, borrowed from the scanned buffer
    Bytes(&'a [u8]),
}

/// One field produced by [`ProtoScanner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoField<'a> {
    /// Field number from the tag
    pub number: u32,
    /// Decoded value
    pub value: FieldValue<'a>,
}

impl<'a> ProtoField<'a> {
    /// Wire type this field was encoded with
    pub fn wire_type(&self) -> WireType {
        match self.value {
            FieldValue::Varint(_) => WireType::Varint,
            FieldValue::Bytes(_) => WireType::Len,
        }
    }

    /// Returns the varint value, if this is a varint field
    pub fn as_varint(&self) -> Option<u64> {
        match self.value {
            FieldValue::Varint(v) => Some(v),
            FieldValue::Bytes(_) => None,
        }
    }

    /// Returns the payload, if this is a length-delimited field
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self.value {
            FieldValue::Bytes(b) => Some(b),
            FieldValue::Varint(_) => None,
        }
    }
}

/// Lazy iterator over the fields of a protobuf-encoded buffer.
///
/// Stops at the end of input, at an unsupported wire type, or at the first
/// malformed field. Once stopped it stays stopped; construct a new scanner
/// to start over.
#[derive(Debug, Clone)]
pub struct ProtoScanner<'a> {
    cursor: ByteCursor<'a>,
    done: bool,
}

impl<'a> ProtoScanner<'a> {
    /// Creates a scanner at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: ByteCursor::new(data),
            done: false,
        }
    }

    /// Value of the first varint field numbered `number`
    pub fn find_varint(data: &'a [u8], number: u32) -> Option<u64> {
        Self::new(data)
            .filter(|f| f.number == number)
            .find_map(|f| f.as_varint())
    }

    /// Payload of the last length-delimited field numbered `number`
    pub fn find_bytes(data: &'a [u8], number: u32) -> Option<&'a [u8]> {
        Self::new(data)
            .filter(|f| f.number == number)
            .filter_map(|f| f.as_bytes())
            .last()
    }

    fn next_field(&mut self) -> Option<ProtoField<'a>> {
        if self.cursor.is_empty() {
            return None;
        }

        let offset = self.cursor.position();
        let tag = self.cursor.read_varint().ok()?;
        let number = u32::try_from(tag >> 3).ok()?;

        let value = match WireType::try_from((tag & 0x07) as u8).ok()? {
            WireType::Varint => FieldValue::Varint(self.cursor.read_varint().ok()?),
            WireType::Len => {
                let len = usize::try_from(self.cursor.read_varint().ok()?).ok()?;
                FieldValue::Bytes(self.cursor.read_slice(len).ok()?)
            }
            other => {
                trace!("Stopping at unsupported wire type {:?} at offset {}", other, offset);
                return None;
            }
        };

        trace!("Field {} at offset {}", number, offset);
        Some(ProtoField { number, value })
    }
}

impl<'a> Iterator for ProtoScanner<'a> {
    type Item = ProtoField<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let field = self.next_field();
        if field.is_none() {
            self.done = true;
        }
        field
    }
}

impl std::iter::FusedIterator for ProtoScanner<'_> {}
