//! Raw registry data encoding
//!
//! Converts [`ValueData`] to and from the `(type, bytes)` pairs stored by
//! the Win32 registry. Strings are UTF-16LE with a terminating NUL; a
//! multi-string is a sequence of such strings closed by an extra NUL.

use crate::types::ValueData;

pub const REG_NONE: u32 = 0;
pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_MULTI_SZ: u32 = 7;
pub const REG_QWORD: u32 = 11;

/// Encode data into its registry type and byte payload
#[must_use]
pub fn encode(data: &ValueData) -> (u32, Vec<u8>) {
    match data {
        ValueData::String(s) => (REG_SZ, encode_wide(s)),
        ValueData::ExpandString(s) => (REG_EXPAND_SZ, encode_wide(s)),
        ValueData::Dword(n) => (REG_DWORD, n.to_le_bytes().to_vec()),
        ValueData::Qword(n) => (REG_QWORD, n.to_le_bytes().to_vec()),
        ValueData::Binary(bytes) => (REG_BINARY, bytes.clone()),
        ValueData::MultiString(items) => {
            let mut bytes = Vec::new();
            for item in items {
                bytes.extend(encode_wide(item));
            }
            bytes.extend([0, 0]);
            (REG_MULTI_SZ, bytes)
        }
    }
}

/// Decode a registry payload; `None` for types this engine does not model
#[must_use]
pub fn decode(raw_type: u32, bytes: &[u8]) -> Option<ValueData> {
    match raw_type {
        REG_SZ => Some(ValueData::String(decode_wide(bytes))),
        REG_EXPAND_SZ => Some(ValueData::ExpandString(decode_wide(bytes))),
        REG_DWORD => {
            let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
            Some(ValueData::Dword(u32::from_le_bytes(raw)))
        }
        REG_QWORD => {
            let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
            Some(ValueData::Qword(u64::from_le_bytes(raw)))
        }
        REG_BINARY => Some(ValueData::Binary(bytes.to_vec())),
        REG_MULTI_SZ => Some(ValueData::MultiString(decode_multi(bytes))),
        _ => None,
    }
}

fn encode_wide(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn wide_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// Stored strings are not always NUL-terminated; stop at the first NUL if any.
fn decode_wide(bytes: &[u8]) -> String {
    let units = wide_units(bytes);
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

fn decode_multi(bytes: &[u8]) -> Vec<String> {
    let units = wide_units(bytes);
    let mut items = Vec::new();
    for item in units.split(|&u| u == 0) {
        if item.is_empty() {
            break;
        }
        items.push(String::from_utf16_lossy(item));
    }
    items
}
