use crate::binxml::ir::{BuildCtx, BuildMode, parse_fragments};
use crate::binxml::ir_json::render_fragments_json;
use crate::binxml::ir_xml::render_fragments_xml;
use crate::err::{DeserializationError, DeserializationResult, Diagnostic, Result};
use crate::evtx_chunk_header::EvtxChunkHeader;
use crate::evtx_parser::OutputFormat;
use crate::evtx_record::{RecordEnvelope, RecordMeta, walk_records};
use crate::json_writer::JsonWriter;
use crate::string_cache::StringCache;
use crate::template_cache::{CacheSession, TemplateCache};
use crate::template_table::TemplateTable;
use crate::utils::ByteCursor;
use crate::utils::bytes;
use crate::{EVTX_CHUNK_HEADER_SIZE, Offset};
use encoding::types::EncodingRef;
use log::debug;
use serde::Serialize;

const RECORD_HEADER_SIZE: usize = 24;

/// A parsed chunk: its header (when one was trusted), the string and
/// template dictionaries, and the underlying 64 KiB slice.
pub struct EvtxChunk<'a> {
    pub data: &'a [u8],
    pub header: EvtxChunkHeader,
    pub(crate) strings: StringCache,
    pub(crate) templates: TemplateTable<'a>,
}

impl<'a> EvtxChunk<'a> {
    /// Parse the chunk header and preload the name and template
    /// dictionaries. Fails only on framing errors; dictionary damage
    /// degrades to partial dictionaries.
    pub fn new(data: &'a [u8]) -> Result<EvtxChunk<'a>> {
        let header = EvtxChunkHeader::from_buf(data)?;
        let strings = StringCache::populate(data, &header.strings_offsets);
        let templates = TemplateTable::populate(data, &header.template_offsets);

        debug!(
            "chunk with records {}..={}: {} common strings, {} templates",
            header.first_event_record_number,
            header.last_event_record_number,
            strings.len(),
            templates.len()
        );

        Ok(EvtxChunk {
            data,
            header,
            strings,
            templates,
        })
    }
}

/// One rendered record. Only the field matching the requested output format
/// is populated; the other stays empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedRecord {
    pub meta: RecordMeta,
    pub xml: String,
    #[serde(skip)]
    pub json: Vec<u8>,
    #[serde(skip)]
    pub diagnostic: Option<Diagnostic>,
}

impl RenderedRecord {
    pub fn is_empty(&self) -> bool {
        self.xml.is_empty() && self.json.is_empty()
    }
}

/// The per-chunk output of a parse: metadata plus rendered records in byte
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunk {
    /// Chunk slot index in the file.
    pub slot: usize,
    /// Absolute file offset of the slot.
    pub offset: u64,
    /// `None` for chunks rebuilt by headerless recovery.
    pub header: Option<EvtxChunkHeader>,
    pub recovered: bool,
    pub records: Vec<RenderedRecord>,
}

pub(crate) struct ChunkOutcome {
    pub chunk: ParsedChunk,
    pub diagnostics: Vec<Diagnostic>,
}

/// Phase-3 worker: trusted header, records walked up to the free-space
/// offset, every record rendered. Individual record failures surface as
/// per-record diagnostics and never abort the chunk.
pub(crate) fn parse_chunk_slot(
    slot: usize,
    file_offset: u64,
    data: &[u8],
    format: OutputFormat,
    ansi_codec: EncodingRef,
    shared_cache: &TemplateCache,
) -> Result<ChunkOutcome> {
    let chunk = EvtxChunk::new(data)?;
    let mut diagnostics = Vec::new();

    let upper = (chunk.header.free_space_offset as usize).clamp(EVTX_CHUNK_HEADER_SIZE, data.len());
    let walk = walk_records(data, upper);
    for record_offset in &walk.invalid_candidates {
        diagnostics.push(Diagnostic::RecordEnvelopeInvalid {
            offset: file_offset,
            record_offset: u64::from(*record_offset),
        });
    }

    let session = CacheSession::new(shared_cache);
    let ctx = BuildCtx {
        data,
        strings: &chunk.strings,
        templates: &chunk.templates,
        session: &session,
        ansi_codec,
    };

    let mut records = Vec::with_capacity(walk.records.len());
    for envelope in &walk.records {
        records.push(render_one(envelope, &ctx, format, false));
    }
    session.finish();

    Ok(ChunkOutcome {
        chunk: ParsedChunk {
            slot,
            offset: file_offset,
            header: Some(chunk.header),
            recovered: false,
            records,
        },
        diagnostics,
    })
}

/// Phase-4 worker: no trusted header. The walker sweeps the full 64 KiB,
/// the in-slot dictionaries are rebuilt best-effort, and only records whose
/// rendering produced output survive.
pub(crate) fn recover_chunk_slot(
    slot: usize,
    file_offset: u64,
    data: &[u8],
    format: OutputFormat,
    ansi_codec: EncodingRef,
    shared_cache: &TemplateCache,
) -> ChunkOutcome {
    // The tables may be garbage; population is resilient and keeps whatever
    // entries still parse.
    let strings = StringCache::populate(data, &read_table::<64>(data, 128));
    let templates = TemplateTable::populate(data, &read_table::<32>(data, 384));

    let session = CacheSession::new(shared_cache);
    let ctx = BuildCtx {
        data,
        strings: &strings,
        templates: &templates,
        session: &session,
        ansi_codec,
    };

    let walk = walk_records(data, data.len());
    let mut records = Vec::new();
    for envelope in &walk.records {
        let record = render_one(envelope, &ctx, format, true);
        if !record.is_empty() {
            records.push(record);
        }
    }
    session.finish();

    debug!(
        "recovered {} of {} candidate records from slot {slot}",
        records.len(),
        walk.records.len()
    );

    ChunkOutcome {
        chunk: ParsedChunk {
            slot,
            offset: file_offset,
            header: None,
            recovered: true,
            records,
        },
        diagnostics: Vec::new(),
    }
}

fn read_table<const N: usize>(data: &[u8], offset: usize) -> [Offset; N] {
    let mut table = [0u32; N];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = bytes::read_u32_le(data, offset + i * 4).unwrap_or(0);
    }
    table
}

fn render_one(
    envelope: &RecordEnvelope<'_>,
    ctx: &BuildCtx<'_, '_>,
    format: OutputFormat,
    recovered: bool,
) -> RenderedRecord {
    match render_record(envelope, ctx, format) {
        Ok((xml, json)) => RenderedRecord {
            meta: envelope.meta(),
            xml,
            json,
            diagnostic: recovered.then(|| Diagnostic::PartialRecovery {
                record_id: envelope.event_record_id,
            }),
        },
        Err(e) => {
            debug!("record {} failed to render: {e}", envelope.event_record_id);
            let diagnostic = match e {
                DeserializationError::TemplateNotFound { .. }
                | DeserializationError::TemplateCompilationFailed { .. } => {
                    Diagnostic::TemplateResolutionFailed {
                        record_id: envelope.event_record_id,
                    }
                }
                other => Diagnostic::BinXmlRenderFailed {
                    record_id: envelope.event_record_id,
                    reason: other.to_string(),
                },
            };
            RenderedRecord {
                meta: envelope.meta(),
                xml: String::new(),
                json: Vec::new(),
                diagnostic: Some(diagnostic),
            }
        }
    }
}

fn render_record(
    envelope: &RecordEnvelope<'_>,
    ctx: &BuildCtx<'_, '_>,
    format: OutputFormat,
) -> DeserializationResult<(String, Vec<u8>)> {
    let body_start = envelope.offset_in_chunk as usize + RECORD_HEADER_SIZE;
    let mut cursor = ByteCursor::with_pos(ctx.data, body_start)?;
    let bound = body_start + envelope.binxml.len();
    let fragments = parse_fragments(&mut cursor, bound, ctx, BuildMode::Record, 0)?;

    match format {
        OutputFormat::Xml => {
            let mut out = String::with_capacity(1024);
            render_fragments_xml(&fragments, ctx, &mut out)?;
            Ok((out, Vec::new()))
        }
        OutputFormat::Json => {
            let mut writer = JsonWriter::with_capacity(1024);
            render_fragments_json(&fragments, ctx, &mut writer)?;
            Ok((String::new(), writer.into_bytes()))
        }
    }
}
