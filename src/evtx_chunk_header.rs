use crate::EVTX_CHUNK_HEADER_SIZE;
use crate::err::{EvtxError, Result};
use crate::utils::bytes;
use serde::Serialize;

const CHUNK_MAGIC: &[u8; 8] = b"ElfChnk\x00";

/// The fixed 512-byte chunk header: 128 bytes of fields, the 64-entry
/// common-string offset table at 128..384 and the 32-entry template offset
/// table at 384..512.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EvtxChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub flags: u32,
    pub header_chunk_checksum: u32,
    #[serde(skip)]
    pub strings_offsets: [u32; 64],
    #[serde(skip)]
    pub template_offsets: [u32; 32],
}

impl std::fmt::Debug for EvtxChunkHeader {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("EvtxChunkHeader")
            .field("first_event_record_number", &self.first_event_record_number)
            .field("last_event_record_number", &self.last_event_record_number)
            .field("first_event_record_id", &self.first_event_record_id)
            .field("last_event_record_id", &self.last_event_record_id)
            .field("free_space_offset", &self.free_space_offset)
            .field("header_chunk_checksum", &self.header_chunk_checksum)
            .finish()
    }
}

impl EvtxChunkHeader {
    /// Parse the chunk header from the start of a chunk slice.
    pub fn from_buf(buf: &[u8]) -> Result<EvtxChunkHeader> {
        if buf.len() < EVTX_CHUNK_HEADER_SIZE {
            return Err(EvtxError::ChunkHeaderTooShort { have: buf.len() });
        }

        let magic: [u8; 8] =
            bytes::read_array(buf, 0).expect("length checked above, chunk magic is in bounds");
        if &magic != CHUNK_MAGIC {
            return Err(EvtxError::InvalidChunkSignature { magic });
        }

        let read_u64 = |offset| bytes::read_u64_le(buf, offset).expect("in bounds");
        let read_u32 = |offset| bytes::read_u32_le(buf, offset).expect("in bounds");

        let mut strings_offsets = [0u32; 64];
        for (i, slot) in strings_offsets.iter_mut().enumerate() {
            *slot = read_u32(128 + i * 4);
        }
        let mut template_offsets = [0u32; 32];
        for (i, slot) in template_offsets.iter_mut().enumerate() {
            *slot = read_u32(384 + i * 4);
        }

        Ok(EvtxChunkHeader {
            first_event_record_number: read_u64(8),
            last_event_record_number: read_u64(16),
            first_event_record_id: read_u64(24),
            last_event_record_id: read_u64(32),
            header_size: read_u32(40),
            last_event_record_data_offset: read_u32(44),
            free_space_offset: read_u32(48),
            events_checksum: read_u32(52),
            // 64 reserved bytes sit between the checksum and the flags.
            flags: read_u32(120),
            header_chunk_checksum: read_u32(124),
            strings_offsets,
            template_offsets,
        })
    }
}

/// Whether the stored header checksum matches a CRC32 over chunk bytes
/// 0..120 and 128..512 (the checksum field itself is skipped).
pub fn validate_header_crc32(chunk: &[u8]) -> bool {
    let (Some(head), Some(tables)) = (chunk.get(..120), chunk.get(128..EVTX_CHUNK_HEADER_SIZE))
    else {
        return false;
    };
    let Some(stored) = bytes::read_u32_le(chunk, 124) else {
        return false;
    };

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(head);
    hasher.update(tables);
    hasher.finalize() == stored
}

/// Whether the stored event-records checksum matches a CRC32 over the data
/// area `512..free_space_offset`.
pub fn validate_data_crc32(chunk: &[u8]) -> bool {
    let Some(free_space_offset) = bytes::read_u32_le(chunk, 48) else {
        return false;
    };
    let Some(stored) = bytes::read_u32_le(chunk, 52) else {
        return false;
    };

    let end = free_space_offset as usize;
    if end < EVTX_CHUNK_HEADER_SIZE {
        return false;
    }
    let Some(data) = chunk.get(EVTX_CHUNK_HEADER_SIZE..end) else {
        return false;
    };

    crc32fast::hash(data) == stored
}
