//! Raw BinXml token bytes.
//!
//! A token is one byte; the low bits select the kind and bit 0x40 is a
//! "more" flag carried by the open-start-element, value, attribute, cdata
//! and entity-reference tokens. Only the exact byte values below are valid;
//! anything else is an invalid stream.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawToken {
    EndOfStream,
    OpenStartElement { has_attributes: bool },
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value,
    Attribute,
    CDataSection,
    EntityReference,
    PITarget,
    PIData,
    TemplateInstance,
    NormalSubstitution,
    OptionalSubstitution,
    FragmentHeader,
}

impl RawToken {
    pub(crate) fn from_u8(byte: u8) -> Option<RawToken> {
        match byte {
            0x00 => Some(RawToken::EndOfStream),
            0x01 => Some(RawToken::OpenStartElement {
                has_attributes: false,
            }),
            0x41 => Some(RawToken::OpenStartElement {
                has_attributes: true,
            }),
            0x02 => Some(RawToken::CloseStartElement),
            0x03 => Some(RawToken::CloseEmptyElement),
            0x04 => Some(RawToken::CloseElement),
            0x05 | 0x45 => Some(RawToken::Value),
            0x06 | 0x46 => Some(RawToken::Attribute),
            0x07 | 0x47 => Some(RawToken::CDataSection),
            0x08 | 0x48 => Some(RawToken::EntityReference),
            0x0A => Some(RawToken::PITarget),
            0x0B => Some(RawToken::PIData),
            0x0C => Some(RawToken::TemplateInstance),
            0x0D => Some(RawToken::NormalSubstitution),
            0x0E => Some(RawToken::OptionalSubstitution),
            0x0F => Some(RawToken::FragmentHeader),
            _ => None,
        }
    }
}
