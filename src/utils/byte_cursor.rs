//! A lightweight cursor over an immutable byte slice.
//!
//! The slice/offset equivalent of `Cursor<&[u8]>` for hot-path parsing where
//! the data is already in memory and we want explicit bounds control without
//! IO-style error plumbing. All reads are little-endian and advance the
//! cursor on success.

use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::bytes;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub(crate) fn with_pos(buf: &'a [u8], pos: usize) -> DeserializationResult<Self> {
        // pos == len is EOF, pos > len is rejected.
        let _ = bytes::slice_r(buf, pos, 0, "cursor.position")?;
        Ok(Self { buf, pos })
    }

    #[inline]
    pub(crate) fn buf(&self) -> &'a [u8] {
        self.buf
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    pub(crate) fn set_pos(&mut self, pos: usize, what: &'static str) -> DeserializationResult<()> {
        let _ = bytes::slice_r(self.buf, pos, 0, what)?;
        self.pos = pos;
        Ok(())
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let new_pos = self
            .pos
            .checked_add(n)
            .ok_or_else(|| DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: n,
                have: self.buf.len().saturating_sub(self.pos),
            })?;
        self.set_pos(new_pos, what)
    }

    #[inline]
    pub(crate) fn take_bytes(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> DeserializationResult<&'a [u8]> {
        let out = bytes::slice_r(self.buf, self.pos, len, what)?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub(crate) fn array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> DeserializationResult<[u8; N]> {
        let v = bytes::read_array_r::<N>(self.buf, self.pos, what)?;
        self.pos += N;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u8(&mut self, what: &'static str) -> DeserializationResult<u8> {
        let b =
            bytes::read_u8(self.buf, self.pos).ok_or_else(|| DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: 1,
                have: self.buf.len().saturating_sub(self.pos),
            })?;
        self.pos += 1;
        Ok(b)
    }

    #[inline]
    pub(crate) fn u16(&mut self, what: &'static str) -> DeserializationResult<u16> {
        let v = bytes::read_u16_le_r(self.buf, self.pos, what)?;
        self.pos += 2;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u32(&mut self, what: &'static str) -> DeserializationResult<u32> {
        let v = bytes::read_u32_le_r(self.buf, self.pos, what)?;
        self.pos += 4;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u64(&mut self, what: &'static str) -> DeserializationResult<u64> {
        let v = bytes::read_u64_le_r(self.buf, self.pos, what)?;
        self.pos += 8;
        Ok(v)
    }

    /// Read a `u16` length prefix (a count of UTF-16 code units), then that
    /// many code units, returning the raw UTF-16LE bytes. Optionally consumes
    /// a trailing NUL code unit.
    pub(crate) fn len_prefixed_utf16(
        &mut self,
        null_terminated: bool,
        what: &'static str,
    ) -> DeserializationResult<&'a [u8]> {
        let char_count = usize::from(self.u16(what)?);
        let byte_len = char_count * 2;
        let out = self.take_bytes(byte_len, what)?;
        if null_terminated {
            let _ = self.u16(what)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_on_success_only() {
        let buf = [0xAA, 0xBB, 0xCC];
        let mut cursor = ByteCursor::new(&buf);
        assert_eq!(cursor.u16("pair").unwrap(), 0xBBAA);
        assert_eq!(cursor.pos(), 2);
        assert!(cursor.u16("pair").is_err());
        assert_eq!(cursor.pos(), 2);
    }

    #[test]
    fn reads_len_prefixed_utf16() {
        // "Hi" plus a NUL terminator.
        let buf = [0x02, 0x00, b'H', 0x00, b'i', 0x00, 0x00, 0x00];
        let mut cursor = ByteCursor::new(&buf);
        let raw = cursor.len_prefixed_utf16(true, "name").unwrap();
        assert_eq!(raw, &[b'H', 0x00, b'i', 0x00]);
        assert_eq!(cursor.pos(), buf.len());
    }
}
