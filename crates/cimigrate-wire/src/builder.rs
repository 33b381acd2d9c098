//! Message encoder used to build records field by field.

use crate::field::{WireType, write_tag};
use crate::varint::write_varint;

/// Appends fields in call order; no sorting or deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire type 0 field.
    #[must_use]
    pub fn varint(mut self, number: u32, value: u64) -> Self {
        write_tag(&mut self.buf, number, WireType::Varint);
        write_varint(&mut self.buf, value);
        self
    }

    /// Wire type 1 field, little-endian.
    #[must_use]
    pub fn fixed64(mut self, number: u32, value: u64) -> Self {
        write_tag(&mut self.buf, number, WireType::Fixed64);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Wire type 2 field with a length prefix.
    #[must_use]
    pub fn bytes(mut self, number: u32, value: &[u8]) -> Self {
        write_tag(&mut self.buf, number, WireType::Bytes);
        write_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    /// Wire type 5 field, little-endian.
    #[must_use]
    pub fn fixed32(mut self, number: u32, value: u32) -> Self {
        write_tag(&mut self.buf, number, WireType::Fixed32);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Raw bytes appended verbatim (for deliberately malformed input).
    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_known_bytes() {
        let data = MessageBuilder::new()
            .varint(1, 1)
            .bytes(7, b"ab")
            .bytes(8, b"")
            .finish();
        assert_eq!(data, [0x08, 0x01, 0x3A, 0x02, b'a', b'b', 0x42, 0x00]);
    }

    #[test]
    fn fixed_widths() {
        let data = MessageBuilder::new().fixed32(1, 1).fixed64(2, 2).finish();
        assert_eq!(data.len(), 1 + 4 + 1 + 8);
    }

    #[test]
    fn raw_appends_verbatim() {
        let builder = MessageBuilder::new().raw(&[0xFF, 0xFF]);
        assert_eq!(builder.len(), 2);
        assert_eq!(builder.finish(), [0xFF, 0xFF]);
    }
}
