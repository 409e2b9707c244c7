//! BinXml value types and payload parsing.
//!
//! Values appear in two encodings: inside the token stream (value-text
//! tokens, where strings carry a length prefix) and inside substitution
//! arrays (where the descriptor supplies the payload size and the payload is
//! addressed absolutely within the chunk buffer). Bit 0x80 of a value type
//! marks an array of the base type.

use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use crate::ntsid::Sid;
use crate::utils::ByteCursor;
use crate::utils::bytes;
use crate::utils::time::{FileTime, SystemTime};
use encoding::types::EncodingRef;
use encoding::DecoderTrap;
use std::borrow::Cow;

pub(crate) const VALUE_ARRAY_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinXmlValueType {
    Null,
    String,
    AnsiString,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real32,
    Real64,
    Bool,
    Binary,
    Guid,
    SizeT,
    FileTime,
    SysTime,
    Sid,
    HexInt32,
    HexInt64,
    EvtHandle,
    BinXmlFragment,
}

impl BinXmlValueType {
    pub(crate) fn from_base(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::Null),
            0x01 => Some(BinXmlValueType::String),
            0x02 => Some(BinXmlValueType::AnsiString),
            0x03 => Some(BinXmlValueType::Int8),
            0x04 => Some(BinXmlValueType::UInt8),
            0x05 => Some(BinXmlValueType::Int16),
            0x06 => Some(BinXmlValueType::UInt16),
            0x07 => Some(BinXmlValueType::Int32),
            0x08 => Some(BinXmlValueType::UInt32),
            0x09 => Some(BinXmlValueType::Int64),
            0x0A => Some(BinXmlValueType::UInt64),
            0x0B => Some(BinXmlValueType::Real32),
            0x0C => Some(BinXmlValueType::Real64),
            0x0D => Some(BinXmlValueType::Bool),
            0x0E => Some(BinXmlValueType::Binary),
            0x0F => Some(BinXmlValueType::Guid),
            0x10 => Some(BinXmlValueType::SizeT),
            0x11 => Some(BinXmlValueType::FileTime),
            0x12 => Some(BinXmlValueType::SysTime),
            0x13 => Some(BinXmlValueType::Sid),
            0x14 => Some(BinXmlValueType::HexInt32),
            0x15 => Some(BinXmlValueType::HexInt64),
            0x20 => Some(BinXmlValueType::EvtHandle),
            0x21 => Some(BinXmlValueType::BinXmlFragment),
            _ => None,
        }
    }

    /// Split a raw type byte into the base type and the array flag.
    pub(crate) fn from_token_byte(byte: u8) -> Option<(BinXmlValueType, bool)> {
        let is_array = byte & VALUE_ARRAY_FLAG != 0;
        Self::from_base(byte & !VALUE_ARRAY_FLAG).map(|ty| (ty, is_array))
    }

    /// On-disk element width for fixed-width types, used to slice arrays.
    fn fixed_width(self) -> Option<usize> {
        match self {
            BinXmlValueType::Int8 | BinXmlValueType::UInt8 => Some(1),
            BinXmlValueType::Int16 | BinXmlValueType::UInt16 => Some(2),
            BinXmlValueType::Int32
            | BinXmlValueType::UInt32
            | BinXmlValueType::Real32
            | BinXmlValueType::HexInt32
            | BinXmlValueType::Bool => Some(4),
            BinXmlValueType::Int64
            | BinXmlValueType::UInt64
            | BinXmlValueType::Real64
            | BinXmlValueType::FileTime
            | BinXmlValueType::HexInt64 => Some(8),
            BinXmlValueType::SysTime | BinXmlValueType::Guid => Some(16),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BinXmlValue<'a> {
    Null,
    /// Raw UTF-16LE bytes; decoded (with U+FFFD replacement) at render time.
    String(Cow<'a, [u8]>),
    AnsiString(Cow<'a, str>),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Bool(bool),
    Binary(Cow<'a, [u8]>),
    Guid(Guid),
    SizeT(u64),
    FileTime(FileTime),
    SysTime(SystemTime),
    Sid(Sid),
    HexInt32(u32),
    HexInt64(u64),
    EvtHandle(u64),
    /// An embedded BinXml fragment, interpreted recursively at render time.
    /// Keeps its chunk-absolute offset so name back-references and template
    /// offsets inside it still resolve.
    BinXmlFragment {
        raw: Cow<'a, [u8]>,
        chunk_offset: u64,
    },
    Array {
        elem_type: BinXmlValueType,
        items: Vec<BinXmlValue<'a>>,
    },
}

impl<'a> BinXmlValue<'a> {
    /// A missing value for substitution purposes.
    pub(crate) fn is_missing(&self) -> bool {
        matches!(self, BinXmlValue::Null)
    }

    pub(crate) fn into_owned(self) -> BinXmlValue<'static> {
        match self {
            BinXmlValue::String(raw) => BinXmlValue::String(Cow::Owned(raw.into_owned())),
            BinXmlValue::AnsiString(s) => BinXmlValue::AnsiString(Cow::Owned(s.into_owned())),
            BinXmlValue::Binary(raw) => BinXmlValue::Binary(Cow::Owned(raw.into_owned())),
            BinXmlValue::BinXmlFragment { raw, chunk_offset } => BinXmlValue::BinXmlFragment {
                raw: Cow::Owned(raw.into_owned()),
                chunk_offset,
            },
            BinXmlValue::Array { elem_type, items } => BinXmlValue::Array {
                elem_type,
                items: items.into_iter().map(BinXmlValue::into_owned).collect(),
            },
            BinXmlValue::Null => BinXmlValue::Null,
            BinXmlValue::Int8(v) => BinXmlValue::Int8(v),
            BinXmlValue::UInt8(v) => BinXmlValue::UInt8(v),
            BinXmlValue::Int16(v) => BinXmlValue::Int16(v),
            BinXmlValue::UInt16(v) => BinXmlValue::UInt16(v),
            BinXmlValue::Int32(v) => BinXmlValue::Int32(v),
            BinXmlValue::UInt32(v) => BinXmlValue::UInt32(v),
            BinXmlValue::Int64(v) => BinXmlValue::Int64(v),
            BinXmlValue::UInt64(v) => BinXmlValue::UInt64(v),
            BinXmlValue::Real32(v) => BinXmlValue::Real32(v),
            BinXmlValue::Real64(v) => BinXmlValue::Real64(v),
            BinXmlValue::Bool(v) => BinXmlValue::Bool(v),
            BinXmlValue::Guid(v) => BinXmlValue::Guid(v),
            BinXmlValue::SizeT(v) => BinXmlValue::SizeT(v),
            BinXmlValue::FileTime(v) => BinXmlValue::FileTime(v),
            BinXmlValue::SysTime(v) => BinXmlValue::SysTime(v),
            BinXmlValue::Sid(v) => BinXmlValue::Sid(v),
            BinXmlValue::HexInt32(v) => BinXmlValue::HexInt32(v),
            BinXmlValue::HexInt64(v) => BinXmlValue::HexInt64(v),
            BinXmlValue::EvtHandle(v) => BinXmlValue::EvtHandle(v),
        }
    }

    /// Parse a substitution payload of a declared size. `offset` is the
    /// payload's position in the chunk, for error reporting.
    pub(crate) fn parse_sized(
        value_type: BinXmlValueType,
        is_array: bool,
        payload: &'a [u8],
        offset: u64,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        if is_array {
            Self::parse_sized_array(value_type, payload, offset, ansi_codec)
        } else {
            Self::parse_scalar(value_type, payload, offset, ansi_codec)
        }
    }

    fn parse_scalar(
        value_type: BinXmlValueType,
        payload: &'a [u8],
        offset: u64,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        fn fixed<const N: usize>(
            payload: &[u8],
            offset: u64,
            what: &'static str,
        ) -> DeserializationResult<[u8; N]> {
            bytes::read_array(payload, 0).ok_or(DeserializationError::Truncated {
                what,
                offset,
                need: N,
                have: payload.len(),
            })
        }

        let value = match value_type {
            BinXmlValueType::Null => BinXmlValue::Null,
            BinXmlValueType::String => BinXmlValue::String(Cow::Borrowed(payload)),
            BinXmlValueType::AnsiString => {
                BinXmlValue::AnsiString(decode_ansi(payload, offset, ansi_codec)?)
            }
            BinXmlValueType::Int8 => {
                BinXmlValue::Int8(i8::from_le_bytes(fixed(payload, offset, "int8")?))
            }
            BinXmlValueType::UInt8 => {
                BinXmlValue::UInt8(u8::from_le_bytes(fixed(payload, offset, "uint8")?))
            }
            BinXmlValueType::Int16 => {
                BinXmlValue::Int16(i16::from_le_bytes(fixed(payload, offset, "int16")?))
            }
            BinXmlValueType::UInt16 => {
                BinXmlValue::UInt16(u16::from_le_bytes(fixed(payload, offset, "uint16")?))
            }
            BinXmlValueType::Int32 => {
                BinXmlValue::Int32(i32::from_le_bytes(fixed(payload, offset, "int32")?))
            }
            BinXmlValueType::UInt32 => {
                BinXmlValue::UInt32(u32::from_le_bytes(fixed(payload, offset, "uint32")?))
            }
            BinXmlValueType::Int64 => {
                BinXmlValue::Int64(i64::from_le_bytes(fixed(payload, offset, "int64")?))
            }
            BinXmlValueType::UInt64 => {
                BinXmlValue::UInt64(u64::from_le_bytes(fixed(payload, offset, "uint64")?))
            }
            BinXmlValueType::Real32 => {
                BinXmlValue::Real32(f32::from_le_bytes(fixed(payload, offset, "real32")?))
            }
            BinXmlValueType::Real64 => {
                BinXmlValue::Real64(f64::from_le_bytes(fixed(payload, offset, "real64")?))
            }
            // Booleans come in several widths; any non-zero byte is true.
            BinXmlValueType::Bool => BinXmlValue::Bool(payload.iter().any(|&b| b != 0)),
            BinXmlValueType::Binary => BinXmlValue::Binary(Cow::Borrowed(payload)),
            BinXmlValueType::Guid => {
                BinXmlValue::Guid(Guid::from_array(fixed(payload, offset, "guid")?))
            }
            BinXmlValueType::SizeT => match payload.len() {
                4 => BinXmlValue::SizeT(u64::from(u32::from_le_bytes(
                    fixed(payload, offset, "size-t")?,
                ))),
                _ => BinXmlValue::SizeT(u64::from_le_bytes(fixed(payload, offset, "size-t")?)),
            },
            BinXmlValueType::FileTime => BinXmlValue::FileTime(FileTime(u64::from_le_bytes(
                fixed(payload, offset, "filetime")?,
            ))),
            BinXmlValueType::SysTime => {
                let raw: [u8; 16] = fixed(payload, offset, "systemtime")?;
                let mut fields = [0u16; 8];
                for (i, field) in fields.iter_mut().enumerate() {
                    *field = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
                }
                BinXmlValue::SysTime(SystemTime::from_array(fields))
            }
            BinXmlValueType::Sid => {
                let (sid, _) = Sid::from_slice(payload, offset)?;
                BinXmlValue::Sid(sid)
            }
            BinXmlValueType::HexInt32 => {
                BinXmlValue::HexInt32(u32::from_le_bytes(fixed(payload, offset, "hexint32")?))
            }
            BinXmlValueType::HexInt64 => {
                BinXmlValue::HexInt64(u64::from_le_bytes(fixed(payload, offset, "hexint64")?))
            }
            BinXmlValueType::EvtHandle => match payload.len() {
                4 => BinXmlValue::EvtHandle(u64::from(u32::from_le_bytes(
                    fixed(payload, offset, "evt handle")?,
                ))),
                _ => BinXmlValue::EvtHandle(u64::from_le_bytes(fixed(
                    payload,
                    offset,
                    "evt handle",
                )?)),
            },
            BinXmlValueType::BinXmlFragment => BinXmlValue::BinXmlFragment {
                raw: Cow::Borrowed(payload),
                chunk_offset: offset,
            },
        };

        Ok(value)
    }

    fn parse_sized_array(
        elem_type: BinXmlValueType,
        payload: &'a [u8],
        offset: u64,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let items = match elem_type {
            // Strings are NUL-delimited rather than fixed-width.
            BinXmlValueType::String => split_utf16le_z(payload)
                .into_iter()
                .map(|entry| BinXmlValue::String(Cow::Borrowed(entry)))
                .collect(),
            BinXmlValueType::AnsiString => {
                let mut items = Vec::new();
                for entry in payload.split(|&b| b == 0) {
                    if entry.is_empty() {
                        continue;
                    }
                    items.push(BinXmlValue::AnsiString(decode_ansi(
                        entry, offset, ansi_codec,
                    )?));
                }
                items
            }
            BinXmlValueType::Sid => {
                let mut items = Vec::new();
                let mut pos = 0usize;
                while payload.len() - pos >= 8 {
                    let (sid, consumed) = Sid::from_slice(&payload[pos..], offset + pos as u64)?;
                    items.push(BinXmlValue::Sid(sid));
                    pos += consumed;
                }
                items
            }
            other => {
                let width = other.fixed_width().ok_or(DeserializationError::BadParserState {
                    reason: "array of a non-arrayable value type",
                })?;
                let mut items = Vec::with_capacity(payload.len() / width);
                for (i, chunk) in payload.chunks_exact(width).enumerate() {
                    items.push(Self::parse_scalar(
                        other,
                        chunk,
                        offset + (i * width) as u64,
                        ansi_codec,
                    )?);
                }
                items
            }
        };

        Ok(BinXmlValue::Array { elem_type, items })
    }

    /// Parse a value-text token body from the token stream. Strings are
    /// length-prefixed here, unlike in substitution payloads.
    pub(crate) fn parse_stream(
        value_type: BinXmlValueType,
        cursor: &mut ByteCursor<'a>,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let value = match value_type {
            BinXmlValueType::Null => BinXmlValue::Null,
            BinXmlValueType::String => {
                BinXmlValue::String(Cow::Borrowed(cursor.len_prefixed_utf16(false, "string value")?))
            }
            BinXmlValueType::AnsiString => {
                let len = usize::from(cursor.u16("ansi string length")?);
                let offset = cursor.position();
                let raw = cursor.take_bytes(len, "ansi string value")?;
                BinXmlValue::AnsiString(decode_ansi(raw, offset, ansi_codec)?)
            }
            BinXmlValueType::Int8 => BinXmlValue::Int8(cursor.u8("int8 value")? as i8),
            BinXmlValueType::UInt8 => BinXmlValue::UInt8(cursor.u8("uint8 value")?),
            BinXmlValueType::Int16 => BinXmlValue::Int16(cursor.u16("int16 value")? as i16),
            BinXmlValueType::UInt16 => BinXmlValue::UInt16(cursor.u16("uint16 value")?),
            BinXmlValueType::Int32 => BinXmlValue::Int32(cursor.u32("int32 value")? as i32),
            BinXmlValueType::UInt32 => BinXmlValue::UInt32(cursor.u32("uint32 value")?),
            BinXmlValueType::Int64 => BinXmlValue::Int64(cursor.u64("int64 value")? as i64),
            BinXmlValueType::UInt64 => BinXmlValue::UInt64(cursor.u64("uint64 value")?),
            BinXmlValueType::Real32 => {
                BinXmlValue::Real32(f32::from_le_bytes(cursor.array("real32 value")?))
            }
            BinXmlValueType::Real64 => {
                BinXmlValue::Real64(f64::from_le_bytes(cursor.array("real64 value")?))
            }
            BinXmlValueType::Bool => BinXmlValue::Bool(cursor.u32("bool value")? != 0),
            BinXmlValueType::Guid => {
                BinXmlValue::Guid(Guid::from_array(cursor.array("guid value")?))
            }
            BinXmlValueType::FileTime => {
                BinXmlValue::FileTime(FileTime(cursor.u64("filetime value")?))
            }
            BinXmlValueType::SysTime => {
                let raw: [u8; 16] = cursor.array("systemtime value")?;
                let mut fields = [0u16; 8];
                for (i, field) in fields.iter_mut().enumerate() {
                    *field = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
                }
                BinXmlValue::SysTime(SystemTime::from_array(fields))
            }
            BinXmlValueType::Sid => {
                let offset = cursor.position();
                let remaining = bytes::slice_r(
                    cursor.buf(),
                    cursor.pos(),
                    cursor.buf().len() - cursor.pos(),
                    "sid value",
                )?;
                let (sid, consumed) = Sid::from_slice(remaining, offset)?;
                cursor.advance(consumed, "sid value")?;
                BinXmlValue::Sid(sid)
            }
            BinXmlValueType::HexInt32 => BinXmlValue::HexInt32(cursor.u32("hexint32 value")?),
            BinXmlValueType::HexInt64 => BinXmlValue::HexInt64(cursor.u64("hexint64 value")?),
            BinXmlValueType::Binary
            | BinXmlValueType::SizeT
            | BinXmlValueType::EvtHandle
            | BinXmlValueType::BinXmlFragment => {
                return Err(DeserializationError::BadParserState {
                    reason: "value token with an out-of-band value type",
                });
            }
        };

        Ok(value)
    }
}

fn decode_ansi<'a>(
    raw: &[u8],
    offset: u64,
    ansi_codec: EncodingRef,
) -> DeserializationResult<Cow<'a, str>> {
    // Payloads regularly carry a trailing NUL; drop it before decoding.
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    ansi_codec
        .decode(&raw[..end], DecoderTrap::Replace)
        .map(Cow::Owned)
        .map_err(|_| DeserializationError::InvalidAnsiString {
            offset,
            codec: ansi_codec.name(),
        })
}

/// Split a UTF-16LE byte run into NUL-delimited entries (borrowed).
fn split_utf16le_z(payload: &[u8]) -> Vec<&[u8]> {
    let usable = payload.len() & !1;
    let mut entries = Vec::new();
    let mut start = 0usize;
    let mut pos = 0usize;

    while pos + 2 <= usable {
        if payload[pos] == 0 && payload[pos + 1] == 0 {
            if pos > start {
                entries.push(&payload[start..pos]);
            }
            start = pos + 2;
        }
        pos += 2;
    }
    if start < usable {
        entries.push(&payload[start..usable]);
    }
    entries
}
