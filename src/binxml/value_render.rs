//! Typed-value formatting.
//!
//! One renderer per output format concern: XML gets escaped text, JSON gets
//! typed values (numbers stay numbers, booleans stay booleans). Embedded
//! BinXml fragments and arrays are structural and are expanded by the
//! emitters, not here.

use crate::binxml::value_variant::BinXmlValue;
use crate::err::{DeserializationError, DeserializationResult};
use crate::json_writer::JsonWriter;
use crate::utils::utf16::decode_utf16le;
use std::fmt::Write;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Escape a string for XML output. `< > &` always; quotes in attributes;
/// C0 controls become numeric character references so output stays printable.
pub(crate) fn escape_xml_into(out: &mut String, text: &str, in_attribute: bool) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            '\'' if in_attribute => out.push_str("&apos;"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "&#x{:X};", c as u32);
            }
            c => out.push(c),
        }
    }
}

fn push_hex_upper(out: &mut String, bytes: &[u8]) {
    out.reserve(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX_UPPER[(b >> 4) as usize] as char);
        out.push(HEX_UPPER[(b & 0x0F) as usize] as char);
    }
}

fn out_of_band(reason: &'static str) -> DeserializationError {
    DeserializationError::BadParserState { reason }
}

/// Render a scalar value as XML text into `out`.
pub(crate) fn write_xml_value(
    out: &mut String,
    value: &BinXmlValue<'_>,
    in_attribute: bool,
) -> DeserializationResult<()> {
    match value {
        BinXmlValue::Null => {}
        BinXmlValue::String(raw) => escape_xml_into(out, &decode_utf16le(raw), in_attribute),
        BinXmlValue::AnsiString(s) => escape_xml_into(out, s, in_attribute),
        BinXmlValue::Int8(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::UInt8(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::Int16(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::UInt16(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::Int32(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::UInt32(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::Int64(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::UInt64(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::Real32(v) => out.push_str(ryu::Buffer::new().format(*v)),
        BinXmlValue::Real64(v) => out.push_str(ryu::Buffer::new().format(*v)),
        BinXmlValue::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
        BinXmlValue::Binary(bytes) => push_hex_upper(out, bytes),
        BinXmlValue::Guid(guid) => out.push_str(&guid.to_string()),
        BinXmlValue::SizeT(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::FileTime(ft) => out.push_str(&ft.to_iso8601()),
        BinXmlValue::SysTime(st) => out.push_str(&st.to_iso8601()),
        BinXmlValue::Sid(sid) => out.push_str(&sid.to_string()),
        BinXmlValue::HexInt32(v) => {
            let _ = write!(out, "0x{v:08x}");
        }
        BinXmlValue::HexInt64(v) => {
            let _ = write!(out, "0x{v:016x}");
        }
        BinXmlValue::EvtHandle(v) => out.push_str(itoa::Buffer::new().format(*v)),
        BinXmlValue::BinXmlFragment { .. } => {
            return Err(out_of_band("binxml fragment reached the value renderer"));
        }
        BinXmlValue::Array { items, .. } => {
            // Arrays are normally expanded structurally by the emitters;
            // in a plain text position the entries are comma-joined.
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_xml_value(out, item, in_attribute)?;
            }
        }
    }
    Ok(())
}

/// Render a value as a typed JSON value.
pub(crate) fn write_json_value(
    w: &mut JsonWriter,
    value: &BinXmlValue<'_>,
) -> DeserializationResult<()> {
    match value {
        BinXmlValue::Null => w.write_null(),
        BinXmlValue::String(raw) => w.write_quoted_str(&decode_utf16le(raw)),
        BinXmlValue::AnsiString(s) => w.write_quoted_str(s),
        BinXmlValue::Int8(v) => w.write_i64(i64::from(*v)),
        BinXmlValue::UInt8(v) => w.write_u64(u64::from(*v)),
        BinXmlValue::Int16(v) => w.write_i64(i64::from(*v)),
        BinXmlValue::UInt16(v) => w.write_u64(u64::from(*v)),
        BinXmlValue::Int32(v) => w.write_i64(i64::from(*v)),
        BinXmlValue::UInt32(v) => w.write_u64(u64::from(*v)),
        BinXmlValue::Int64(v) => w.write_i64(*v),
        BinXmlValue::UInt64(v) => w.write_u64(*v),
        BinXmlValue::Real32(v) => w.write_f32(*v),
        BinXmlValue::Real64(v) => w.write_f64(*v),
        BinXmlValue::Bool(v) => w.write_bool(*v),
        BinXmlValue::Binary(bytes) => {
            let mut hex = String::new();
            push_hex_upper(&mut hex, bytes);
            w.write_quoted_str(&hex);
        }
        BinXmlValue::Guid(guid) => w.write_quoted_str(&guid.to_string()),
        BinXmlValue::SizeT(v) => w.write_u64(*v),
        BinXmlValue::FileTime(ft) => w.write_quoted_str(&ft.to_iso8601()),
        BinXmlValue::SysTime(st) => w.write_quoted_str(&st.to_iso8601()),
        BinXmlValue::Sid(sid) => w.write_quoted_str(&sid.to_string()),
        BinXmlValue::HexInt32(v) => w.write_quoted_str(&format!("0x{v:08x}")),
        BinXmlValue::HexInt64(v) => w.write_quoted_str(&format!("0x{v:016x}")),
        BinXmlValue::EvtHandle(v) => w.write_u64(*v),
        BinXmlValue::BinXmlFragment { .. } => {
            return Err(out_of_band("binxml fragment reached the value renderer"));
        }
        BinXmlValue::Array { items, .. } => {
            w.open_array();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.comma();
                }
                write_json_value(w, item)?;
            }
            w.close_array();
        }
    }
    Ok(())
}

/// Render a value as the plain text used for string collapsing in JSON
/// element content (no XML escaping, no JSON quoting).
pub(crate) fn write_plain_text(
    out: &mut String,
    value: &BinXmlValue<'_>,
) -> DeserializationResult<()> {
    match value {
        BinXmlValue::Null => {}
        BinXmlValue::String(raw) => out.push_str(&decode_utf16le(raw)),
        BinXmlValue::AnsiString(s) => out.push_str(s),
        BinXmlValue::Binary(bytes) => push_hex_upper(out, bytes),
        BinXmlValue::Array { items, .. } => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_plain_text(out, item)?;
            }
        }
        BinXmlValue::BinXmlFragment { .. } => {
            return Err(out_of_band("binxml fragment reached the value renderer"));
        }
        other => write_xml_value(out, other, false)?,
    }
    Ok(())
}
