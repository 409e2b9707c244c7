//! The two-phase parallel orchestrator.
//!
//! Phase 1 parses the file header (fatal on failure). Phase 2 enumerates
//! the fixed-size chunk slots and screens them by signature and, when
//! enabled, CRC32. Phase 3 parses the accepted slots in parallel, in file
//! order. Phase 4 re-scans every rejected slot with the headerless record
//! walker, keeping whatever still renders; recovered chunks are appended
//! after the phase-3 chunks.

use crate::err::{Diagnostic, EvtxError, Result};
use crate::evtx_chunk::{ChunkOutcome, ParsedChunk, parse_chunk_slot, recover_chunk_slot};
use crate::evtx_chunk_header::{validate_data_crc32, validate_header_crc32};
use crate::evtx_file_header::EvtxFileHeader;
use crate::evtx_record::RecordMeta;
use crate::template_cache::TemplateCache;
use crate::{EVTX_CHUNK_SIZE, EVTX_FILE_HEADER_BLOCK_SIZE};
use encoding::types::EncodingRef;
use log::{debug, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

const CHUNK_MAGIC: &[u8; 8] = b"ElfChnk\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Xml,
    Json,
}

/// Cooperative cancellation. Cheap to clone; polled at slot starts and
/// phase boundaries, never inside a record.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EvtxError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone)]
pub struct ParserSettings {
    num_threads: usize,
    format: OutputFormat,
    validate_checksums: bool,
    ansi_codec: EncodingRef,
    template_cache: Option<Arc<TemplateCache>>,
    cancellation: CancellationToken,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            num_threads: 0,
            format: OutputFormat::Xml,
            validate_checksums: false,
            ansi_codec: encoding::all::WINDOWS_1252,
            template_cache: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("num_threads", &self.num_threads)
            .field("format", &self.format)
            .field("validate_checksums", &self.validate_checksums)
            .field("ansi_codec", &self.ansi_codec.name())
            .field("cancellation", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker thread count: `0` uses all cores, `1` runs fully
    /// single-threaded without a pool.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    /// Codec for ansi string values (type 0x02).
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    /// Pre-populated compiled-template cache (e.g. extracted from provider
    /// binaries by an external tool).
    pub fn template_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.template_cache = Some(cache);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// The parser over a complete in-memory EVTX buffer.
pub struct EvtxParser<'a> {
    data: &'a [u8],
    settings: ParserSettings,
}

impl<'a> EvtxParser<'a> {
    pub fn from_buffer(data: &'a [u8]) -> Self {
        EvtxParser {
            data,
            settings: ParserSettings::default(),
        }
    }

    pub fn with_configuration(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn parse(&self) -> Result<ParsedFile> {
        let settings = &self.settings;
        settings.cancellation.check()?;

        let header = EvtxFileHeader::from_buf(self.data)?;
        if !header.validate_checksum(self.data) {
            debug!("file header checksum is stale; the file was likely captured dirty");
        }

        let slot_count = self.data.len().saturating_sub(EVTX_FILE_HEADER_BLOCK_SIZE) / EVTX_CHUNK_SIZE;
        debug!("{slot_count} chunk slots (header says {})", header.chunk_count);

        let mut diagnostics = Vec::new();
        let mut accepted = Vec::with_capacity(slot_count);
        let mut rejected = Vec::new();

        for slot in 0..slot_count {
            let offset = EVTX_FILE_HEADER_BLOCK_SIZE + slot * EVTX_CHUNK_SIZE;
            let chunk = &self.data[offset..offset + EVTX_CHUNK_SIZE];

            if &chunk[..8] != CHUNK_MAGIC {
                diagnostics.push(Diagnostic::ChunkSignatureInvalid {
                    slot,
                    offset: offset as u64,
                });
                rejected.push((slot, offset));
                continue;
            }

            if settings.validate_checksums
                && !(validate_header_crc32(chunk) && validate_data_crc32(chunk))
            {
                diagnostics.push(Diagnostic::ChunkChecksumFailed {
                    slot,
                    offset: offset as u64,
                });
                rejected.push((slot, offset));
                continue;
            }

            accepted.push((slot, offset));
        }

        settings.cancellation.check()?;

        let cache = settings
            .template_cache
            .clone()
            .unwrap_or_else(|| Arc::new(TemplateCache::new()));

        // Phase 3: accepted slots, in file order.
        let outcomes = self.for_each_slot(&accepted, |slot, offset| {
            parse_chunk_slot(
                slot,
                offset as u64,
                &self.data[offset..offset + EVTX_CHUNK_SIZE],
                settings.format,
                settings.ansi_codec,
                &cache,
            )
        })?;

        let mut chunks = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(ChunkOutcome {
                    chunk,
                    diagnostics: chunk_diagnostics,
                }) => {
                    diagnostics.extend(chunk_diagnostics);
                    chunks.push(chunk);
                }
                // A slot that passed screening but failed framing anyway;
                // treat it like any other rejected slot.
                Err(e) => {
                    warn!("accepted chunk slot failed to parse: {e}");
                }
            }
        }

        settings.cancellation.check()?;

        // Phase 4: headerless recovery over everything set aside.
        let recovered = self.for_each_slot(&rejected, |slot, offset| {
            Ok(recover_chunk_slot(
                slot,
                offset as u64,
                &self.data[offset..offset + EVTX_CHUNK_SIZE],
                settings.format,
                settings.ansi_codec,
                &cache,
            ))
        })?;

        for outcome in recovered.into_iter().flatten() {
            if !outcome.chunk.records.is_empty() {
                diagnostics.extend(outcome.diagnostics);
                chunks.push(outcome.chunk);
            }
        }

        Ok(ParsedFile {
            header,
            chunks,
            diagnostics,
        })
    }

    /// Run `work` over the slot list, in parallel unless the settings say
    /// otherwise. Results come back in input order. Cancellation is polled
    /// at the start of every slot.
    fn for_each_slot<T, F>(&self, slots: &[(usize, usize)], work: F) -> Result<Vec<Result<T>>>
    where
        T: Send,
        F: Fn(usize, usize) -> Result<T> + Sync,
    {
        let token = &self.settings.cancellation;
        let run_one = |&(slot, offset): &(usize, usize)| -> Result<T> {
            token.check()?;
            work(slot, offset)
        };

        let outcomes = if self.settings.num_threads == 1 {
            slots.iter().map(run_one).collect::<Vec<_>>()
        } else {
            self.run_pooled(slots, &run_one)
        };

        // A cancelled worker cancels the parse; no partial results.
        if outcomes.iter().any(|o| matches!(o, Err(EvtxError::Cancelled))) {
            return Err(EvtxError::Cancelled);
        }
        Ok(outcomes)
    }

    #[cfg(feature = "multithreading")]
    fn run_pooled<T, F>(&self, slots: &[(usize, usize)], run_one: &F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&(usize, usize)) -> Result<T> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.num_threads)
            .build();
        match pool {
            Ok(pool) => pool.install(|| slots.par_iter().map(run_one).collect()),
            Err(e) => {
                warn!("failed to build a worker pool ({e}), parsing single-threaded");
                slots.iter().map(run_one).collect()
            }
        }
    }

    #[cfg(not(feature = "multithreading"))]
    fn run_pooled<T, F>(&self, slots: &[(usize, usize)], run_one: &F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&(usize, usize)) -> Result<T> + Sync,
    {
        slots.iter().map(run_one).collect()
    }
}

/// The result of a successful parse.
#[derive(Debug)]
pub struct ParsedFile {
    pub header: EvtxFileHeader,
    /// Phase-3 chunks in file order, then recovered chunks.
    pub chunks: Vec<ParsedChunk>,
    /// Chunk-level skip reasons and record-envelope rejections.
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedFile {
    pub fn total_records(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.records.len()).sum()
    }

    /// Iterate all rendered records in file order (recovered chunks last).
    pub fn events(&self) -> impl Iterator<Item = Event<'_>> {
        self.chunks.iter().flat_map(|chunk| {
            chunk.records.iter().map(|record| Event {
                meta: &record.meta,
                xml: &record.xml,
                json: &record.json,
                diagnostic: record.diagnostic.as_ref(),
            })
        })
    }
}

/// One event as seen through the flat iterator. Exactly one of `xml` /
/// `json` is non-empty for successfully rendered records, matching the
/// requested output format.
#[derive(Debug, Clone, Copy)]
pub struct Event<'p> {
    pub meta: &'p RecordMeta,
    pub xml: &'p str,
    pub json: &'p [u8],
    pub diagnostic: Option<&'p Diagnostic>,
}

impl Event<'_> {
    pub fn record_id(&self) -> u64 {
        self.meta.event_record_id
    }

    pub fn rendered(&self) -> bool {
        !self.xml.is_empty() || !self.json.is_empty()
    }
}
