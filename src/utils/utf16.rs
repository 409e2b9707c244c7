//! UTF-16LE decoding helpers.
//!
//! Output always has to encode as valid UTF-8, so unpaired surrogates are
//! replaced with U+FFFD at decode time; the byte-exact UTF-16 stays available
//! in the source buffer for callers that need it.

/// Decode a UTF-16LE byte slice, stopping at the first NUL (0x0000) code unit
/// if present. Unpaired surrogates become U+FFFD.
pub(crate) fn decode_utf16le(bytes: &[u8]) -> String {
    let usable = bytes.len() & !1;
    let mut units = Vec::with_capacity(usable / 2);
    for chunk in bytes[..usable].chunks_exact(2) {
        let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    decode_utf16_units(&units)
}

/// Decode UTF-16 code units with U+FFFD replacement for unpaired surrogates.
pub(crate) fn decode_utf16_units(units: &[u16]) -> String {
    // Fast path: pure ASCII converts directly, no surrogate handling needed.
    if units.iter().all(|&unit| unit != 0 && unit <= 0x7F) {
        return units.iter().map(|&unit| unit as u8 as char).collect();
    }

    char::decode_utf16(units.iter().copied())
        .map(|decoded| decoded.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// The common-string table hash: `h = h * 65599 + unit` over UTF-16 code
/// units, truncated to 16 bits. Buckets are `hash % 64`.
pub(crate) fn name_hash(bytes: &[u8]) -> u16 {
    let usable = bytes.len() & !1;
    let mut hash: u32 = 0;
    for chunk in bytes[..usable].chunks_exact(2) {
        let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
        hash = hash.wrapping_mul(65599).wrapping_add(u32::from(unit));
    }
    (hash & 0xFFFF) as u16
}
