//! Field-level rewrite primitives.
//!
//! Every primitive that changes a message rebuilds it from scratch by
//! walking field numbers `1..=MAX_FIELD_NUMBER` in ascending order. Fields
//! outside that range are dropped by a rebuild. Contract-info messages have
//! fewer than ten top-level fields, so the bound loses nothing for them; a
//! differently shaped message needs a wider bound.

use cimigrate_error::Result;

use crate::field::{FieldMap, ProtobufField, WireType, parse_fields, write_tag};

/// Highest field number a rebuild emits.
pub const MAX_FIELD_NUMBER: u32 = 10;

/// What a rebuild emits at one field position.
#[derive(Debug, Clone, Copy)]
enum Slot<'a> {
    Field(ProtobufField<'a>),
    Empty,
    Absent,
}

fn rebuild<'a>(fields: &FieldMap<'a>, mut slot_for: impl FnMut(u32) -> Slot<'a>) -> Vec<u8> {
    let capacity = fields
        .iter()
        .map(|f| f.raw_payload.len() + 2)
        .sum::<usize>()
        + 2;
    let mut out = Vec::with_capacity(capacity);
    for number in 1..=MAX_FIELD_NUMBER {
        match slot_for(number) {
            Slot::Field(field) => field.encode_as(number, &mut out),
            Slot::Empty => {
                write_tag(&mut out, number, WireType::Bytes);
                out.push(0);
            }
            Slot::Absent => {}
        }
    }
    out
}

fn slot_of<'a>(fields: &FieldMap<'a>, number: u32) -> Slot<'a> {
    fields.get(number).map_or(Slot::Absent, |f| Slot::Field(*f))
}

/// Exchange the payloads of fields `a` and `b`.
///
/// At position `a` the original field `b` is emitted (with its wire type)
/// and vice versa. If only one of them exists it moves to the other
/// position. Returns `data` unchanged when neither exists.
///
/// # Errors
/// Fails if `data` does not parse.
pub fn swap_fields(data: &[u8], a: u32, b: u32) -> Result<Vec<u8>> {
    let fields = parse_fields(data)?;
    if !fields.contains(a) && !fields.contains(b) {
        return Ok(data.to_vec());
    }
    Ok(rebuild(&fields, |number| {
        let source = if number == a {
            b
        } else if number == b {
            a
        } else {
            number
        };
        slot_of(&fields, source)
    }))
}

/// Remove `field_number` entirely.
///
/// # Errors
/// Fails if `data` does not parse.
pub fn clear_field(data: &[u8], field_number: u32) -> Result<Vec<u8>> {
    let fields = parse_fields(data)?;
    Ok(rebuild(&fields, |number| {
        if number == field_number {
            Slot::Absent
        } else {
            slot_of(&fields, number)
        }
    }))
}

/// Add a zero-length bytes field at `field_number` if it is missing.
///
/// Returns `data` unchanged when the field already exists, whatever its
/// content.
///
/// # Errors
/// Fails if `data` does not parse.
pub fn insert_empty_field(data: &[u8], field_number: u32) -> Result<Vec<u8>> {
    let fields = parse_fields(data)?;
    if fields.contains(field_number) {
        return Ok(data.to_vec());
    }
    Ok(rebuild(&fields, |number| {
        if number == field_number {
            Slot::Empty
        } else {
            slot_of(&fields, number)
        }
    }))
}

/// Force `field_number` to a zero-length bytes field, overwriting any
/// existing content.
///
/// # Errors
/// Fails if `data` does not parse.
pub fn set_empty_field(data: &[u8], field_number: u32) -> Result<Vec<u8>> {
    let fields = parse_fields(data)?;
    Ok(rebuild(&fields, |number| {
        if number == field_number {
            Slot::Empty
        } else {
            slot_of(&fields, number)
        }
    }))
}
