//! EBML primitives
//!
//! Matroska output is byte-exact by construction: every master
//! element is rendered into an owned buffer first, so sizes are always
//! known and written in their minimal form. The only deliberately
//! non-minimal encodings are the 8-byte segment size and the 8-byte
//! duration float, both of which get patched after the fact.

use crate::error::{Error, Result};

/// Element ID of the Void filler element
pub const ID_VOID: u32 = 0xEC;

/// Number of bytes a value needs as an EBML size field
pub fn vint_size(value: u64) -> usize {
    for len in 1..8 {
        // Top value of each length is reserved for "unknown"
        if value < (1u64 << (7 * len)) - 1 {
            return len;
        }
    }
    8
}

/// Append a size field in its minimal encoding
pub fn write_vint(out: &mut Vec<u8>, value: u64) {
    let len = vint_size(value);
    write_vint_with_len(out, value, len);
}

/// Append a size field using exactly `len` bytes
pub fn write_vint_with_len(out: &mut Vec<u8>, value: u64, len: usize) {
    debug_assert!(len >= vint_size(value) && len <= 8);
    let marker = 1u64 << (7 * len);
    let v = marker | value;
    for i in (0..len).rev() {
        out.push((v >> (8 * i)) as u8);
    }
}

/// Append an element ID. IDs carry their own length marker in their
/// defined value, so they are written as the shortest big-endian form.
pub fn write_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    out.extend_from_slice(&bytes[skip..]);
}

/// Bytes an ID occupies on the wire
pub fn id_size(id: u32) -> usize {
    4 - id.to_be_bytes().iter().position(|&b| b != 0).unwrap_or(3)
}

/// Unsigned integer element, minimal payload width
pub fn uint_element(out: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    write_id(out, id);
    write_vint(out, (8 - skip) as u64);
    out.extend_from_slice(&bytes[skip..]);
}

/// Float element, always 8 bytes so it can be patched in place
pub fn float_element(out: &mut Vec<u8>, id: u32, value: f64) {
    write_id(out, id);
    write_vint(out, 8);
    out.extend_from_slice(&value.to_be_bytes());
}

/// UTF-8 string element
pub fn string_element(out: &mut Vec<u8>, id: u32, value: &str) {
    write_id(out, id);
    write_vint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

/// Binary element
pub fn binary_element(out: &mut Vec<u8>, id: u32, value: &[u8]) {
    write_id(out, id);
    write_vint(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Master element wrapping pre-rendered children
pub fn master_element(out: &mut Vec<u8>, id: u32, children: &[u8]) {
    write_id(out, id);
    write_vint(out, children.len() as u64);
    out.extend_from_slice(children);
}

/// Render a Void element occupying exactly `total` bytes on the wire,
/// ID and size field included. The minimum representable Void is two
/// bytes.
pub fn void_element(out: &mut Vec<u8>, total: usize) -> Result<()> {
    if total < 2 {
        return Err(Error::invalid_state(format!(
            "cannot cover {} bytes with a Void element",
            total
        )));
    }
    write_id(out, ID_VOID);
    if total - 2 <= 126 {
        write_vint_with_len(out, (total - 2) as u64, 1);
        out.resize(out.len() + total - 2, 0);
    } else {
        // 1 ID byte + 8 size bytes
        write_vint_with_len(out, (total - 9) as u64, 8);
        out.resize(out.len() + total - 9, 0);
    }
    Ok(())
}

/// The 8-byte "size unknown" marker used while a segment is open
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Encode a known segment size into the same 8 bytes
pub fn known_size_8(value: u64) -> [u8; 8] {
    let mut bytes = (value | (1u64 << 56)).to_be_bytes();
    bytes[0] = 0x01 | bytes[0];
    bytes
}
