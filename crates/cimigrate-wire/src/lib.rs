//! Schema-less protobuf wire codec for contract-info records.
//!
//! The records this crate handles may carry content in the wrong field, so
//! a compiled schema cannot be trusted to decode them. Everything here works
//! at the level of tags, wire types and raw payloads:
//!
//! - [`varint`]: base-128 varints
//! - [`field`]: tag parsing, [`FieldMap`], value accessors
//! - [`rewrite`]: swap / clear / insert / set primitives bounded to fields
//!   `1..=MAX_FIELD_NUMBER`
//! - [`builder`]: [`MessageBuilder`] for encoding records

pub mod builder;
pub mod field;
pub mod rewrite;
pub mod varint;

pub use builder::MessageBuilder;
pub use field::{
    FieldMap, MAX_PROTOBUF_FIELD_NUMBER, ProtobufField, WireType, encode_tag, get_field_value,
    has_field, parse_fields, write_tag,
};
pub use rewrite::{
    MAX_FIELD_NUMBER, clear_field, insert_empty_field, set_empty_field, swap_fields,
};
pub use varint::{MAX_VARINT_LEN, read_varint, varint_len, write_varint};
