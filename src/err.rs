use crate::guid::Guid;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Fatal parse errors. Anything that surfaces through this type aborts the
/// parse; recoverable conditions travel as [`Diagnostic`] values on the
/// (successful) parse result instead.
#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("File header requires at least 128 bytes, found {have}")]
    FileHeaderTooShort { have: usize },

    #[error("Invalid EVTX file header magic, expected `ElfFile\\x00`, found `{magic:02X?}`")]
    InvalidFileSignature { magic: [u8; 8] },

    #[error("Chunk header requires at least 512 bytes, found {have}")]
    ChunkHeaderTooShort { have: usize },

    #[error("Invalid EVTX chunk header magic, expected `ElfChnk\\x00`, found `{magic:02X?}`")]
    InvalidChunkSignature { magic: [u8; 8] },

    #[error("The parse was cancelled")]
    Cancelled,

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
}

/// Errors raised while decoding BinXml. These abort the *record* being
/// rendered, never the parse; the orchestrator converts them into
/// [`Diagnostic::BinXmlRenderFailed`] entries.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("Offset {offset}: truncated {what}, need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Offset {offset}: tried to read an invalid byte `{value:#04x}` as a binxml token")]
    InvalidToken { value: u8, offset: u64 },

    #[error("Offset {offset}: tried to read an invalid byte `{value:#04x}` as a binxml value type")]
    InvalidValueType { value: u8, offset: u64 },

    #[error("Offset {offset}: no template definition at this offset (guid {guid:?})")]
    TemplateNotFound { offset: u64, guid: Option<Guid> },

    #[error("Compilation of template {guid} failed on a previous record")]
    TemplateCompilationFailed { guid: Guid },

    #[error("Offset {offset}: failed to decode an ansi string with codec {codec}")]
    InvalidAnsiString { offset: u64, codec: &'static str },

    #[error("Offset {offset}: binxml fragments nested deeper than {limit} levels")]
    FragmentsNestedTooDeep { offset: u64, limit: usize },

    #[error("Bad parser state: {reason}")]
    BadParserState { reason: &'static str },
}

/// Non-fatal conditions observed during a parse. The parse result is always
/// fully constructed and iterable when diagnostics are present.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("Chunk slot at offset {offset:#x}: invalid chunk signature, deferred to recovery")]
    ChunkSignatureInvalid { slot: usize, offset: u64 },

    #[error("Chunk slot at offset {offset:#x}: checksum mismatch, deferred to recovery")]
    ChunkChecksumFailed { slot: usize, offset: u64 },

    #[error("Chunk slot at offset {offset:#x}: record envelope at {record_offset:#x} is invalid")]
    RecordEnvelopeInvalid { offset: u64, record_offset: u64 },

    #[error("Record {record_id}: binxml rendering failed: {reason}")]
    BinXmlRenderFailed { record_id: u64, reason: String },

    #[error("Record {record_id}: could not resolve the referenced template definition")]
    TemplateResolutionFailed { record_id: u64 },

    #[error("Record {record_id}: recovered without full template context")]
    PartialRecovery { record_id: u64 },
}
