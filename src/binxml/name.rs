//! Name reference resolution.
//!
//! Element and attribute names are 4-byte references into the chunk. A
//! reference either points back at an entry of the common-string table
//! (usually preloaded), or at the current stream position, in which case the
//! name struct is defined inline and the stream continues past it.

use crate::err::DeserializationResult;
use crate::string_cache::{StringCache, read_name_struct};
use crate::utils::ByteCursor;
use log::trace;

/// Resolve the name reference at the cursor, advancing past an inline
/// definition when the reference points at the current position.
pub(crate) fn read_name(
    cursor: &mut ByteCursor<'_>,
    strings: &StringCache,
) -> DeserializationResult<String> {
    let name_offset = cursor.u32("name offset")?;

    if name_offset as usize == cursor.pos() {
        // Inline definition; materialize it and continue after the struct.
        let (_next, entry) = read_name_struct(cursor.buf(), name_offset)?;
        cursor.advance(entry.struct_size as usize, "inline name")?;
        return Ok(entry.name);
    }

    if let Some(cached) = strings.get(name_offset) {
        return Ok(cached.name.clone());
    }

    // A back-reference the preloader did not reach (damaged bucket table).
    trace!("name at offset {name_offset} missed the string cache");
    let (_next, entry) = read_name_struct(cursor.buf(), name_offset)?;
    Ok(entry.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_struct(name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(units.len() as u16).to_le_bytes());
        for unit in units {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    #[test]
    fn reads_an_inline_name_and_advances() {
        let mut buf = 4u32.to_le_bytes().to_vec(); // reference to position 4
        buf.extend_from_slice(&name_struct("Level"));
        buf.push(0x02); // next token

        let cache = StringCache::default();
        let mut cursor = ByteCursor::new(&buf);
        let name = read_name(&mut cursor, &cache).unwrap();
        assert_eq!(name, "Level");
        assert_eq!(cursor.u8("next token").unwrap(), 0x02);
    }

    #[test]
    fn falls_back_to_a_direct_read_on_cache_miss() {
        let mut buf = name_struct("Task");
        let reference_pos = buf.len();
        buf.extend_from_slice(&0u32.to_le_bytes()); // back-reference to offset 0

        let cache = StringCache::default();
        let mut cursor = ByteCursor::with_pos(&buf, reference_pos).unwrap();
        assert_eq!(read_name(&mut cursor, &cache).unwrap(), "Task");
    }
}
