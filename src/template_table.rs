use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use crate::utils::bytes;
use crate::{AHashMap, Offset};
use hashbrown::HashSet;
use log::debug;

/// Size of the descriptor preceding a template body:
/// `{ next_offset: u32, guid: [u8; 16], data_size: u32 }`.
pub(crate) const TEMPLATE_DESCRIPTOR_SIZE: usize = 24;

/// First token of every template body.
const FRAGMENT_HEADER_TOKEN: u8 = 0x0F;

/// A template definition, keyed in the table by its descriptor's
/// chunk-relative offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TemplateDefinition<'a> {
    pub next_offset: Offset,
    pub guid: Guid,
    pub data_size: u32,
    /// Chunk-relative offset of the body (descriptor offset + 24).
    pub body_offset: Offset,
    /// The BinXml body; starts with the fragment-header token.
    pub body: &'a [u8],
}

/// The chunk-local dictionary of template definitions discovered by walking
/// the 32-entry pointer table and each entry's next-offset chain.
#[derive(Debug, Default)]
pub(crate) struct TemplateTable<'a>(AHashMap<Offset, TemplateDefinition<'a>>);

impl<'a> TemplateTable<'a> {
    /// Walk the pointer table. Out-of-bounds pointers, malformed descriptors
    /// and chain cycles are skipped; preloading never fails a chunk.
    pub(crate) fn populate(chunk: &'a [u8], table: &[Offset]) -> Self {
        let mut definitions = AHashMap::default();
        let mut visited: HashSet<Offset> = HashSet::new();

        for &head in table.iter().filter(|&&offset| offset > 0) {
            let mut offset = head;
            while offset > 0 {
                if !visited.insert(offset) {
                    debug!("template chain loops back to offset {offset}, stopping");
                    break;
                }
                match read_template_definition(chunk, offset) {
                    Ok(definition) => {
                        let next = definition.next_offset;
                        definitions.insert(offset, definition);
                        offset = next;
                    }
                    Err(e) => {
                        debug!("skipping template definition at offset {offset}: {e}");
                        break;
                    }
                }
            }
        }

        TemplateTable(definitions)
    }

    pub(crate) fn get(&self, offset: Offset) -> Option<&TemplateDefinition<'a>> {
        self.0.get(&offset)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Read the 24-byte descriptor at `offset` and slice out the body it
/// advertises. Also used as the fallback path when a record references an
/// offset the preloader never reached (damaged pointer table).
pub(crate) fn read_template_definition(
    chunk: &[u8],
    offset: Offset,
) -> DeserializationResult<TemplateDefinition<'_>> {
    let descriptor_start = offset as usize;
    let next_offset = bytes::read_u32_le_r(chunk, descriptor_start, "template next offset")?;
    let guid_bytes = bytes::read_array_r::<16>(chunk, descriptor_start + 4, "template guid")?;
    let data_size = bytes::read_u32_le_r(chunk, descriptor_start + 20, "template data size")?;

    if data_size == 0 {
        return Err(DeserializationError::BadParserState {
            reason: "template definition with zero data size",
        });
    }

    let body_start = descriptor_start + TEMPLATE_DESCRIPTOR_SIZE;
    let body = bytes::slice_r(chunk, body_start, data_size as usize, "template body")?;

    if body[0] != FRAGMENT_HEADER_TOKEN {
        return Err(DeserializationError::InvalidToken {
            value: body[0],
            offset: body_start as u64,
        });
    }

    Ok(TemplateDefinition {
        next_offset,
        guid: Guid::from_array(guid_bytes),
        data_size,
        body_offset: body_start as Offset,
        body,
    })
}
