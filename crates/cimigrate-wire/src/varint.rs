//! Protobuf base-128 varints.
//!
//! Little-endian groups of 7 bits, high bit set on every byte except the
//! last. A `u64` needs at most 10 bytes; the 10th byte may only carry the
//! single remaining bit.

/// Maximum encoded length of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Read a varint from a byte slice, returning `(value, bytes_consumed)`.
///
/// Returns `None` if the input ends mid-varint or the encoding overflows
/// 64 bits.
#[must_use]
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Compute the number of bytes needed to encode a value as a varint.
#[must_use]
pub const fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Append a varint to `out`, returning the number of bytes written.
#[allow(clippy::cast_possible_truncation)]
pub fn write_varint(out: &mut Vec<u8>, value: u64) -> usize {
    let mut v = value;
    let mut written = 0;
    while v >= 0x80 {
        out.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
        written += 1;
    }
    out.push(v as u8);
    written + 1
}
