//! Field-level parsing of protobuf messages without a schema.
//!
//! [`parse_fields`] walks a message tag by tag and returns a [`FieldMap`]
//! holding, for each field number, the **last** occurrence seen. Earlier
//! duplicates are discarded. This matches how the records were originally
//! written and is the one place data can silently disappear: a message with
//! a repeated field keeps only its final element.

use std::collections::BTreeMap;
use std::fmt;

use cimigrate_error::{MigrateError, Result};
use serde::{Deserialize, Serialize};

use crate::varint::{read_varint, write_varint};

/// Largest field number protobuf allows (`2^29 - 1`).
pub const MAX_PROTOBUF_FIELD_NUMBER: u64 = (1 << 29) - 1;

/// Protobuf wire types this codec understands.
///
/// Group start/end (3/4) are deprecated and never appear in contract-info
/// records; they are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireType {
    /// Wire type 0.
    Varint,
    /// Wire type 1.
    Fixed64,
    /// Wire type 2 (length-delimited).
    Bytes,
    /// Wire type 5.
    Fixed32,
}

impl WireType {
    /// Decode the 3-bit wire type from a tag.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::Bytes),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }

    /// The 3-bit wire type value.
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::Bytes => 2,
            Self::Fixed32 => 5,
        }
    }

    /// Stable label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Varint => "varint",
            Self::Fixed64 => "fixed64",
            Self::Bytes => "bytes",
            Self::Fixed32 => "fixed32",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a parsed message, borrowing its payload from the input.
///
/// For [`WireType::Bytes`] fields `raw_payload` still carries the length
/// prefix, so re-emitting a field is a tag write plus a byte copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtobufField<'a> {
    pub number: u32,
    pub wire_type: WireType,
    pub raw_payload: &'a [u8],
}

impl<'a> ProtobufField<'a> {
    /// Logical value: the payload with any length prefix stripped.
    #[must_use]
    pub fn value(&self) -> &'a [u8] {
        if self.wire_type != WireType::Bytes {
            return self.raw_payload;
        }
        match read_varint(self.raw_payload) {
            Some((_, prefix_len)) => &self.raw_payload[prefix_len..],
            None => self.raw_payload,
        }
    }

    /// Whether the logical value is zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value().is_empty()
    }

    /// Append this field's payload to `out` under a different field number.
    pub fn encode_as(&self, number: u32, out: &mut Vec<u8>) {
        write_tag(out, number, self.wire_type);
        out.extend_from_slice(self.raw_payload);
    }
}

/// Parsed message: field number → last occurrence, iterated in ascending
/// field-number order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap<'a> {
    fields: BTreeMap<u32, ProtobufField<'a>>,
}

impl<'a> FieldMap<'a> {
    /// Field with the given number, if present.
    #[must_use]
    pub fn get(&self, number: u32) -> Option<&ProtobufField<'a>> {
        self.fields.get(&number)
    }

    /// Whether a field with the given number is present.
    #[must_use]
    pub fn contains(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Number of distinct field numbers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields were parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in ascending field-number order.
    pub fn iter(&self) -> impl Iterator<Item = &ProtobufField<'a>> {
        self.fields.values()
    }

    /// Field numbers above `bound`, which a bounded rebuild would drop.
    #[must_use]
    pub fn numbers_above(&self, bound: u32) -> Vec<u32> {
        self.fields.range(bound.saturating_add(1)..).map(|(&n, _)| n).collect()
    }

    fn insert(&mut self, field: ProtobufField<'a>) {
        self.fields.insert(field.number, field);
    }
}

/// Parse `data` into a [`FieldMap`].
///
/// Empty input parses to an empty map.
///
/// # Errors
/// Fails on a malformed varint, a payload running past the end of the
/// input, an unsupported wire type, or an out-of-range field number.
pub fn parse_fields(data: &[u8]) -> Result<FieldMap<'_>> {
    let mut fields = FieldMap::default();
    let mut offset = 0;

    while offset < data.len() {
        let tag_offset = offset;
        let (tag, tag_len) = read_varint(&data[offset..])
            .ok_or(MigrateError::MalformedVarint { offset: tag_offset })?;
        offset += tag_len;

        let number = tag >> 3;
        if number == 0 || number > MAX_PROTOBUF_FIELD_NUMBER {
            return Err(MigrateError::InvalidFieldNumber {
                offset: tag_offset,
                number,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let raw_wire = (tag & 0x07) as u8;
        let wire_type =
            WireType::from_raw(raw_wire).ok_or(MigrateError::UnsupportedWireType {
                offset: tag_offset,
                wire_type: raw_wire,
            })?;

        let payload_len = payload_len(data, offset, wire_type)?;
        let remaining = data.len() - offset;
        if payload_len > remaining {
            return Err(MigrateError::Truncated {
                offset,
                needed: payload_len - remaining,
            });
        }

        fields.insert(ProtobufField {
            number: u32::try_from(number).map_err(|_| MigrateError::InvalidFieldNumber {
                offset: tag_offset,
                number,
            })?,
            wire_type,
            raw_payload: &data[offset..offset + payload_len],
        });
        offset += payload_len;
    }

    Ok(fields)
}

/// Total payload length (including any length prefix) of the field whose
/// payload starts at `offset`.
fn payload_len(data: &[u8], offset: usize, wire_type: WireType) -> Result<usize> {
    match wire_type {
        WireType::Varint => read_varint(&data[offset..])
            .map(|(_, len)| len)
            .ok_or(MigrateError::MalformedVarint { offset }),
        WireType::Fixed64 => Ok(8),
        WireType::Fixed32 => Ok(4),
        WireType::Bytes => {
            let (len, prefix_len) =
                read_varint(&data[offset..]).ok_or(MigrateError::MalformedVarint { offset })?;
            usize::try_from(len)
                .ok()
                .and_then(|len| len.checked_add(prefix_len))
                .ok_or(MigrateError::Truncated {
                    offset,
                    needed: usize::MAX,
                })
        }
    }
}

/// Encode a field tag: varint of `(field_number << 3) | wire_type`.
#[must_use]
pub fn encode_tag(field_number: u32, wire_type: WireType) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    write_tag(&mut out, field_number, wire_type);
    out
}

/// Append a field tag to `out`.
pub fn write_tag(out: &mut Vec<u8>, field_number: u32, wire_type: WireType) {
    let tag = (u64::from(field_number) << 3) | u64::from(wire_type.as_raw());
    write_varint(out, tag);
}

/// Logical value of `field_number`, or `None` if the field is missing.
///
/// # Errors
/// Fails if `data` does not parse.
pub fn get_field_value(data: &[u8], field_number: u32) -> Result<Option<&[u8]>> {
    let fields = parse_fields(data)?;
    Ok(fields.get(field_number).map(ProtobufField::value))
}

/// Whether `field_number` is present. Unparsable input reports `false`.
#[must_use]
pub fn has_field(data: &[u8], field_number: u32) -> bool {
    parse_fields(data).is_ok_and(|fields| fields.contains(field_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageBuilder;

    #[test]
    fn parse_empty_is_empty_map() {
        let fields = parse_fields(&[]).expect("empty input parses");
        assert!(fields.is_empty());
    }

    #[test]
    fn parse_all_wire_types() {
        let data = MessageBuilder::new()
            .varint(1, 150)
            .fixed64(2, 0x0102_0304_0506_0708)
            .bytes(3, b"hello")
            .fixed32(4, 0xDEAD_BEEF)
            .finish();
        let fields = parse_fields(&data).expect("well-formed message");
        assert_eq!(fields.len(), 4);

        let f1 = fields.get(1).expect("field 1");
        assert_eq!(f1.wire_type, WireType::Varint);
        assert_eq!(f1.raw_payload, &[0x96, 0x01]);

        let f2 = fields.get(2).expect("field 2");
        assert_eq!(f2.wire_type, WireType::Fixed64);
        assert_eq!(f2.value().len(), 8);

        let f3 = fields.get(3).expect("field 3");
        assert_eq!(f3.wire_type, WireType::Bytes);
        assert_eq!(f3.raw_payload, b"\x05hello");
        assert_eq!(f3.value(), b"hello");

        let f4 = fields.get(4).expect("field 4");
        assert_eq!(f4.wire_type, WireType::Fixed32);
        assert_eq!(f4.value(), 0xDEAD_BEEF_u32.to_le_bytes());
    }

    #[test]
    fn last_occurrence_wins() {
        let data = MessageBuilder::new()
            .bytes(2, b"first")
            .bytes(3, b"x")
            .bytes(2, b"second")
            .finish();
        let fields = parse_fields(&data).expect("parses");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get(2).expect("field 2").value(), b"second");
    }

    #[test]
    fn unterminated_varint_tag_fails() {
        let err = parse_fields(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).expect_err("must fail");
        assert!(matches!(err, MigrateError::MalformedVarint { offset: 0 }));
    }

    #[test]
    fn truncated_bytes_payload_fails() {
        // field 1, bytes, declared length 10, only 3 bytes present
        let err = parse_fields(&[0x0A, 0x0A, b'a', b'b', b'c']).expect_err("must fail");
        assert!(
            matches!(err, MigrateError::Truncated { offset: 1, needed: 7 }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn truncated_fixed_payload_fails() {
        // field 1, fixed64, only 4 bytes
        let err = parse_fields(&[0x09, 1, 2, 3, 4]).expect_err("must fail");
        assert!(matches!(err, MigrateError::Truncated { .. }));
        // field 1, fixed32, only 2 bytes
        let err = parse_fields(&[0x0D, 1, 2]).expect_err("must fail");
        assert!(matches!(err, MigrateError::Truncated { .. }));
    }

    #[test]
    fn group_wire_types_rejected() {
        for raw in [3_u8, 4, 6, 7] {
            let tag = (1 << 3) | raw;
            let err = parse_fields(&[tag, 0x00]).expect_err("must fail");
            assert!(
                matches!(err, MigrateError::UnsupportedWireType { wire_type, .. } if wire_type == raw),
                "wire type {raw}: {err:?}"
            );
        }
    }

    #[test]
    fn field_number_zero_rejected() {
        let err = parse_fields(&[0x02, 0x00]).expect_err("must fail");
        assert!(matches!(err, MigrateError::InvalidFieldNumber { number: 0, .. }));
    }

    #[test]
    fn encode_tag_values() {
        assert_eq!(encode_tag(1, WireType::Varint), [0x08]);
        assert_eq!(encode_tag(7, WireType::Bytes), [0x3A]);
        assert_eq!(encode_tag(8, WireType::Bytes), [0x42]);
        assert_eq!(encode_tag(16, WireType::Bytes), [0x82, 0x01]);
    }

    #[test]
    fn get_field_value_present_and_missing() {
        let data = MessageBuilder::new().bytes(7, b"ext").finish();
        assert_eq!(get_field_value(&data, 7).expect("parses"), Some(&b"ext"[..]));
        assert_eq!(get_field_value(&data, 8).expect("parses"), None);
        assert!(get_field_value(&[0xFF], 7).is_err());
    }

    #[test]
    fn has_field_false_for_unparsable() {
        let data = MessageBuilder::new().bytes(8, b"").finish();
        assert!(has_field(&data, 8));
        assert!(!has_field(&data, 7));
        assert!(!has_field(&[0x42, 0x05], 8));
    }

    #[test]
    fn empty_bytes_field_is_present_and_empty() {
        let data = MessageBuilder::new().bytes(8, b"").finish();
        let fields = parse_fields(&data).expect("parses");
        let f8 = fields.get(8).expect("field 8 present");
        assert!(f8.is_empty());
        assert_eq!(f8.raw_payload, &[0x00]);
    }

    #[test]
    fn numbers_above_bound() {
        let data = MessageBuilder::new()
            .bytes(1, b"a")
            .bytes(11, b"b")
            .varint(20, 1)
            .finish();
        let fields = parse_fields(&data).expect("parses");
        assert_eq!(fields.numbers_above(10), vec![11, 20]);
    }

    #[test]
    fn encode_as_renumbers() {
        let data = MessageBuilder::new().bytes(8, b"moved").finish();
        let fields = parse_fields(&data).expect("parses");
        let mut out = Vec::new();
        fields.get(8).expect("field 8").encode_as(7, &mut out);
        assert_eq!(out, MessageBuilder::new().bytes(7, b"moved").finish());
    }
}
