//! A parser for the Windows XML Event Log (EVTX) format.
//!
//! The parser operates on a complete in-memory byte buffer; records, template
//! bodies and value payloads are borrowed views into it. Chunks are dispatched
//! to worker threads in two phases: structurally valid chunks first, then a
//! headerless recovery pass over the slots that were rejected (bad signature,
//! bad checksum), so that records trapped behind a damaged chunk header are
//! still extracted.
//!
//! ```no_run
//! use winevtx::{EvtxParser, ParserSettings};
//!
//! let buffer = std::fs::read("Security.evtx").unwrap();
//! let parser = EvtxParser::from_buffer(&buffer)
//!     .with_configuration(ParserSettings::new().num_threads(0));
//! let parsed = parser.parse().unwrap();
//!
//! for event in parsed.events() {
//!     println!("{}", event.xml);
//! }
//! ```

pub mod err;

mod binxml;
mod evtx_chunk;
mod evtx_chunk_header;
mod evtx_file_header;
mod evtx_parser;
mod evtx_record;
mod guid;
mod json_writer;
mod ntsid;
mod string_cache;
mod template_cache;
mod template_table;
mod utils;

pub use crate::err::{DeserializationError, Diagnostic, EvtxError, Result};
pub use crate::evtx_chunk::{EvtxChunk, ParsedChunk, RenderedRecord};
pub use crate::evtx_chunk_header::EvtxChunkHeader;
pub use crate::evtx_file_header::{EvtxFileHeader, HeaderFlags};
pub use crate::evtx_parser::{
    CancellationToken, Event, EvtxParser, OutputFormat, ParsedFile, ParserSettings,
};
pub use crate::evtx_record::{RecordEnvelope, RecordMeta};
pub use crate::guid::Guid;
pub use crate::ntsid::Sid;
pub use crate::template_cache::{CompiledTemplate, TemplateCache};
pub use crate::utils::time::FileTime;

/// A chunk-relative byte offset.
pub type Offset = u32;

/// Size of the file header block. The header itself occupies the first 128
/// bytes; the rest of the block is reserved.
pub const EVTX_FILE_HEADER_BLOCK_SIZE: usize = 4096;

/// Size of a chunk, header included.
pub const EVTX_CHUNK_SIZE: usize = 65536;

/// Size of the chunk header, including the common-string and template tables.
pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

pub(crate) type AHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;
