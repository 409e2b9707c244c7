use crate::err::{EvtxError, Result};
use crate::utils::bytes;
use bitflags::bitflags;
use serde::Serialize;

pub const EVTX_FILE_HEADER_SIZE: usize = 128;
const FILE_MAGIC: &[u8; 8] = b"ElfFile\x00";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const DIRTY = 0x1;
        const FULL = 0x2;
        const NO_CRC32 = 0x4;
    }
}

/// The fixed 128-byte EVTX file header (the remainder of the 4096-byte block
/// is reserved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: u32,
    /// CRC32 of header bytes 0..120.
    pub checksum: u32,
}

impl EvtxFileHeader {
    /// Parse the header from the start of a buffer of at least 128 bytes.
    pub fn from_buf(buf: &[u8]) -> Result<EvtxFileHeader> {
        if buf.len() < EVTX_FILE_HEADER_SIZE {
            return Err(EvtxError::FileHeaderTooShort { have: buf.len() });
        }

        let magic: [u8; 8] =
            bytes::read_array(buf, 0).expect("length checked above, header magic is in bounds");
        if &magic != FILE_MAGIC {
            return Err(EvtxError::InvalidFileSignature { magic });
        }

        // All reads below are within the 128 bytes validated above.
        let read_u64 = |offset| bytes::read_u64_le(buf, offset).expect("in bounds");
        let read_u32 = |offset| bytes::read_u32_le(buf, offset).expect("in bounds");
        let read_u16 = |offset| bytes::read_u16_le(buf, offset).expect("in bounds");

        Ok(EvtxFileHeader {
            first_chunk_number: read_u64(8),
            last_chunk_number: read_u64(16),
            next_record_id: read_u64(24),
            header_size: read_u32(32),
            minor_version: read_u16(36),
            major_version: read_u16(38),
            header_block_size: read_u16(40),
            chunk_count: read_u16(42),
            flags: read_u32(120),
            checksum: read_u32(124),
        })
    }

    pub fn header_flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags)
    }

    pub fn is_dirty(&self) -> bool {
        self.header_flags().contains(HeaderFlags::DIRTY)
    }

    /// Whether the stored checksum matches a CRC32 over header bytes 0..120.
    /// Always true when the no-crc32 flag is set.
    pub fn validate_checksum(&self, buf: &[u8]) -> bool {
        if self.header_flags().contains(HeaderFlags::NO_CRC32) {
            return true;
        }
        match buf.get(..120) {
            Some(covered) => crc32fast::hash(covered) == self.checksum,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Vec<u8> {
        let mut buf = vec![0u8; EVTX_FILE_HEADER_SIZE];
        buf[..8].copy_from_slice(b"ElfFile\x00");
        buf[8..16].copy_from_slice(&0u64.to_le_bytes()); // first chunk
        buf[16..24].copy_from_slice(&25u64.to_le_bytes()); // last chunk
        buf[24..32].copy_from_slice(&2226u64.to_le_bytes()); // next record id
        buf[32..36].copy_from_slice(&128u32.to_le_bytes());
        buf[36..38].copy_from_slice(&1u16.to_le_bytes()); // minor
        buf[38..40].copy_from_slice(&3u16.to_le_bytes()); // major
        buf[40..42].copy_from_slice(&4096u16.to_le_bytes());
        buf[42..44].copy_from_slice(&26u16.to_le_bytes());
        buf[120..124].copy_from_slice(&1u32.to_le_bytes()); // dirty
        let crc = crc32fast::hash(&buf[..120]);
        buf[124..128].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    #[test]
    fn parses_a_file_header() {
        let buf = sample_header();
        let header = EvtxFileHeader::from_buf(&buf).unwrap();

        assert_eq!(header.last_chunk_number, 25);
        assert_eq!(header.next_record_id, 2226);
        assert_eq!(header.header_size, 128);
        assert_eq!((header.major_version, header.minor_version), (3, 1));
        assert_eq!(header.header_block_size, 4096);
        assert_eq!(header.chunk_count, 26);
        assert!(header.is_dirty());
        assert!(header.validate_checksum(&buf));
    }

    #[test]
    fn rejects_a_short_buffer() {
        let err = EvtxFileHeader::from_buf(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, EvtxError::FileHeaderTooShort { have: 64 }));
    }

    #[test]
    fn rejects_a_bad_magic() {
        let mut buf = sample_header();
        buf[0] = b'X';
        let err = EvtxFileHeader::from_buf(&buf).unwrap_err();
        assert!(matches!(err, EvtxError::InvalidFileSignature { .. }));
    }

    #[test]
    fn detects_a_stale_checksum() {
        let mut buf = sample_header();
        buf[24] ^= 0xFF;
        let header = EvtxFileHeader::from_buf(&buf).unwrap();
        assert!(!header.validate_checksum(&buf));
    }
}
