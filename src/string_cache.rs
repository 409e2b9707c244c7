use crate::err::DeserializationResult;
use crate::utils::ByteCursor;
use crate::utils::utf16::{decode_utf16le, name_hash};
use crate::{AHashMap, Offset};
use hashbrown::HashSet;
use log::debug;

/// A name entry in the chunk's common-string table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedString {
    pub name: String,
    pub hash: u16,
    /// Size of the on-disk name struct, NUL terminator included.
    pub struct_size: u32,
}

/// The chunk-local dictionary of element/attribute names, keyed by
/// chunk-relative offset.
///
/// Each of the 64 table buckets points at the most recently inserted string
/// of that hash class; every string carries the offset of the string that
/// previously headed the bucket, forming a singly-linked chain that is
/// walked to the end here.
#[derive(Debug, Default)]
pub(crate) struct StringCache(AHashMap<Offset, CachedString>);

impl StringCache {
    pub(crate) fn populate(chunk: &[u8], bucket_heads: &[Offset]) -> Self {
        let mut cache = AHashMap::default();
        let mut visited: HashSet<Offset> = HashSet::new();

        for &head in bucket_heads.iter().filter(|&&offset| offset > 0) {
            let mut offset = head;
            while offset > 0 {
                if !visited.insert(offset) {
                    debug!("common-string chain loops back to offset {offset}, stopping");
                    break;
                }
                match read_name_struct(chunk, offset) {
                    Ok((next, entry)) => {
                        cache.insert(offset, entry);
                        offset = next;
                    }
                    Err(e) => {
                        debug!("skipping common-string entry at offset {offset}: {e}");
                        break;
                    }
                }
            }
        }

        StringCache(cache)
    }

    pub(crate) fn get(&self, offset: Offset) -> Option<&CachedString> {
        self.0.get(&offset)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Parse the on-disk name struct `{ next: u32, hash: u16, len: u16,
/// UTF-16LE body, NUL }` at `offset`, returning the chained next offset and
/// the decoded entry.
pub(crate) fn read_name_struct(
    chunk: &[u8],
    offset: Offset,
) -> DeserializationResult<(Offset, CachedString)> {
    let mut cursor = ByteCursor::with_pos(chunk, offset as usize)?;
    let next = cursor.u32("string entry next offset")?;
    let hash = cursor.u16("string entry hash")?;
    let raw = cursor.len_prefixed_utf16(true, "string entry body")?;

    if hash != name_hash(raw) {
        log::trace!("string entry at offset {offset} carries a stale hash");
    }

    Ok((
        next,
        CachedString {
            name: decode_utf16le(raw),
            hash,
            struct_size: (cursor.pos() - offset as usize) as u32,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_name(buf: &mut Vec<u8>, next: u32, name: &str) -> (Offset, u16) {
        let offset = buf.len() as Offset;
        let units: Vec<u16> = name.encode_utf16().collect();
        let raw: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        let hash = name_hash(&raw);

        buf.extend_from_slice(&next.to_le_bytes());
        buf.extend_from_slice(&hash.to_le_bytes());
        buf.extend_from_slice(&(units.len() as u16).to_le_bytes());
        buf.extend_from_slice(&raw);
        buf.extend_from_slice(&[0, 0]);
        (offset, hash)
    }

    #[test]
    fn populates_through_hash_chains() {
        let mut buf = vec![0u8; 512];
        let (first, _) = write_name(&mut buf, 0, "Event");
        let (second, _) = write_name(&mut buf, first, "System");

        // Bucket head points at the most recent string; the chain leads back.
        let cache = StringCache::populate(&buf, &[second]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(first).unwrap().name, "Event");
        assert_eq!(cache.get(second).unwrap().name, "System");
    }

    #[test]
    fn terminates_on_a_chain_cycle() {
        let mut buf = vec![0u8; 512];
        let (first, _) = write_name(&mut buf, 0, "Loop");
        // Point the entry back at itself.
        buf[first as usize..first as usize + 4].copy_from_slice(&first.to_le_bytes());

        let cache = StringCache::populate(&buf, &[first]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn skips_out_of_bounds_heads() {
        let buf = vec![0u8; 64];
        let cache = StringCache::populate(&buf, &[60_000]);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn stored_hash_matches_the_computed_hash() {
        let mut buf = vec![0u8; 16];
        let (offset, expected) = write_name(&mut buf, 0, "Provider");
        let (_, entry) = read_name_struct(&buf, offset).unwrap();
        assert_eq!(entry.hash, expected);
        assert_eq!(entry.name, "Provider");
    }
}
