//! Synthetic EVTX fixtures.
//!
//! Builds bit-exact files in memory: file header with CRC32, chunks with
//! their common-string hash table, template table and record envelopes, and
//! BinXml bodies rendered through a tiny token writer. Corruption knobs
//! (magic flips, checksum damage, zero fills) seed the recovery scenarios.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

// Tests run concurrently; initialize logging exactly once.
pub fn ensure_env_logger_initialized() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub const FILE_HEADER_BLOCK: usize = 4096;
pub const CHUNK_SIZE: usize = 65536;
pub const CHUNK_HEADER_SIZE: usize = 512;

pub const SAMPLE_TEMPLATE_GUID: [u8; 16] = [
    0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD,
    0xEF,
];

/// 1970-01-01 in FILETIME ticks; record timestamps count seconds from here.
pub const EPOCH_TICKS: u64 = 116_444_736_000_000_000;

pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn name_hash(utf16: &[u8]) -> u16 {
    let mut hash: u32 = 0;
    for chunk in utf16.chunks_exact(2) {
        let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
        hash = hash.wrapping_mul(65599).wrapping_add(u32::from(unit));
    }
    (hash & 0xFFFF) as u16
}

/// BinXml token writer.
#[derive(Default)]
pub struct BinXml(pub Vec<u8>);

impl BinXml {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragment_header(mut self) -> Self {
        self.0.extend_from_slice(&[0x0F, 0x01, 0x01, 0x00]);
        self
    }

    pub fn open(mut self, name_offset: u32, has_attributes: bool) -> Self {
        self.0.push(if has_attributes { 0x41 } else { 0x01 });
        self.0.extend_from_slice(&0xFFFFu16.to_le_bytes());
        self.0.extend_from_slice(&0u32.to_le_bytes()); // data size (unused)
        self.0.extend_from_slice(&name_offset.to_le_bytes());
        if has_attributes {
            self.0.extend_from_slice(&0u32.to_le_bytes()); // attr list size
        }
        self
    }

    pub fn attr(mut self, name_offset: u32) -> Self {
        self.0.push(0x06);
        self.0.extend_from_slice(&name_offset.to_le_bytes());
        self
    }

    pub fn string_value(mut self, text: &str) -> Self {
        self.0.push(0x05);
        self.0.push(0x01);
        let raw = utf16le(text);
        self.0
            .extend_from_slice(&((raw.len() / 2) as u16).to_le_bytes());
        self.0.extend_from_slice(&raw);
        self
    }

    pub fn normal_sub(mut self, index: u16, value_type: u8) -> Self {
        self.0.push(0x0D);
        self.0.extend_from_slice(&index.to_le_bytes());
        self.0.push(value_type);
        self
    }

    pub fn optional_sub(mut self, index: u16, value_type: u8) -> Self {
        self.0.push(0x0E);
        self.0.extend_from_slice(&index.to_le_bytes());
        self.0.push(value_type);
        self
    }

    pub fn close_start(mut self) -> Self {
        self.0.push(0x02);
        self
    }

    pub fn close_empty(mut self) -> Self {
        self.0.push(0x03);
        self
    }

    pub fn close(mut self) -> Self {
        self.0.push(0x04);
        self
    }

    pub fn eof(mut self) -> Self {
        self.0.push(0x00);
        self
    }

    pub fn template_instance(mut self, template_id: u32, definition_offset: u32) -> Self {
        self.0.push(0x0C);
        self.0.push(0x01);
        self.0.extend_from_slice(&template_id.to_le_bytes());
        self.0.extend_from_slice(&definition_offset.to_le_bytes());
        self
    }

    /// Substitution array: count, descriptors, then the payloads.
    pub fn substitutions(mut self, entries: &[(u8, Vec<u8>)]) -> Self {
        self.0
            .extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (value_type, payload) in entries {
            self.0
                .extend_from_slice(&(payload.len() as u16).to_le_bytes());
            self.0.push(*value_type);
            self.0.push(0x00);
        }
        for (_, payload) in entries {
            self.0.extend_from_slice(payload);
        }
        self
    }
}

pub struct ChunkBuilder {
    data: Vec<u8>,
    cursor: usize,
    string_buckets: [u32; 64],
    template_entries: Vec<u32>,
    names: HashMap<String, u32>,
    first_record_id: Option<u64>,
    last_record_id: u64,
    last_record_offset: u32,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        ChunkBuilder {
            data: vec![0u8; CHUNK_SIZE],
            cursor: CHUNK_HEADER_SIZE,
            string_buckets: [0u32; 64],
            template_entries: Vec::new(),
            names: HashMap::new(),
            first_record_id: None,
            last_record_id: 0,
            last_record_offset: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.data[self.cursor..self.cursor + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
    }

    fn align(&mut self, to: usize) {
        while self.cursor % to != 0 {
            self.cursor += 1;
        }
    }

    /// Intern a name into the common-string table, chaining hash buckets
    /// the way the real format does (bucket head is the newest entry).
    pub fn name_offset(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.names.get(name) {
            return offset;
        }
        let offset = self.cursor as u32;
        let raw = utf16le(name);
        let hash = name_hash(&raw);
        let bucket = usize::from(hash % 64);

        let next = self.string_buckets[bucket];
        self.write(&next.to_le_bytes());
        self.write(&hash.to_le_bytes());
        self.write(&((raw.len() / 2) as u16).to_le_bytes());
        self.write(&raw);
        self.write(&[0, 0]);

        self.string_buckets[bucket] = offset;
        self.names.insert(name.to_string(), offset);
        offset
    }

    /// Write a template definition (descriptor + body) and register it in
    /// the template pointer table. Returns the descriptor offset records
    /// reference.
    pub fn add_template(&mut self, guid: [u8; 16], body: &[u8]) -> u32 {
        self.align(4);
        let offset = self.cursor as u32;
        self.write(&0u32.to_le_bytes()); // next template offset
        self.write(&guid);
        self.write(&(body.len() as u32).to_le_bytes());
        self.write(body);
        self.template_entries.push(offset);
        offset
    }

    pub fn add_record(&mut self, record_id: u64, written_ticks: u64, body: &[u8]) {
        self.align(8);
        let mut body = body.to_vec();
        while (24 + body.len() + 4) % 8 != 0 {
            body.push(0);
        }
        let size = (24 + body.len() + 4) as u32;

        self.last_record_offset = self.cursor as u32;
        self.write(&[0x2A, 0x2A, 0x00, 0x00]);
        self.write(&size.to_le_bytes());
        self.write(&record_id.to_le_bytes());
        self.write(&written_ticks.to_le_bytes());
        self.write(&body);
        self.write(&size.to_le_bytes());

        self.first_record_id.get_or_insert(record_id);
        self.last_record_id = record_id;
    }

    pub fn finish(mut self) -> Vec<u8> {
        let free_space = self.cursor as u32;
        let first = self.first_record_id.unwrap_or(0);
        let last = self.last_record_id;

        self.data[0..8].copy_from_slice(b"ElfChnk\x00");
        self.data[8..16].copy_from_slice(&first.to_le_bytes());
        self.data[16..24].copy_from_slice(&last.to_le_bytes());
        self.data[24..32].copy_from_slice(&first.to_le_bytes());
        self.data[32..40].copy_from_slice(&last.to_le_bytes());
        self.data[40..44].copy_from_slice(&128u32.to_le_bytes());
        self.data[44..48].copy_from_slice(&self.last_record_offset.to_le_bytes());
        self.data[48..52].copy_from_slice(&free_space.to_le_bytes());

        let data_crc = crc32fast::hash(&self.data[CHUNK_HEADER_SIZE..free_space as usize]);
        self.data[52..56].copy_from_slice(&data_crc.to_le_bytes());

        for (i, head) in self.string_buckets.iter().enumerate() {
            self.data[128 + i * 4..132 + i * 4].copy_from_slice(&head.to_le_bytes());
        }
        for (i, entry) in self.template_entries.iter().enumerate().take(32) {
            self.data[384 + i * 4..388 + i * 4].copy_from_slice(&entry.to_le_bytes());
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..120]);
        hasher.update(&self.data[128..512]);
        let header_crc = hasher.finalize();
        self.data[124..128].copy_from_slice(&header_crc.to_le_bytes());

        self.data
    }
}

/// The standard event template used by the scenario files:
/// System envelope (Provider, EventID, TimeCreated, EventRecordID, Channel,
/// Computer) plus one EventData Data element.
pub fn standard_template_body(chunk: &mut ChunkBuilder) -> Vec<u8> {
    let event = chunk.name_offset("Event");
    let xmlns = chunk.name_offset("xmlns");
    let system = chunk.name_offset("System");
    let provider = chunk.name_offset("Provider");
    let name = chunk.name_offset("Name");
    let event_id = chunk.name_offset("EventID");
    let time_created = chunk.name_offset("TimeCreated");
    let system_time = chunk.name_offset("SystemTime");
    let event_record_id = chunk.name_offset("EventRecordID");
    let channel = chunk.name_offset("Channel");
    let computer = chunk.name_offset("Computer");
    let event_data = chunk.name_offset("EventData");
    let data = chunk.name_offset("Data");

    BinXml::new()
        .fragment_header()
        .open(event, true)
        .attr(xmlns)
        .string_value("http://schemas.microsoft.com/win/2004/08/events/event")
        .close_start()
        .open(system, false)
        .close_start()
        .open(provider, true)
        .attr(name)
        .normal_sub(0, 0x01)
        .close_empty()
        .open(event_id, false)
        .close_start()
        .normal_sub(1, 0x06)
        .close()
        .open(time_created, true)
        .attr(system_time)
        .optional_sub(2, 0x11)
        .close_empty()
        .open(event_record_id, false)
        .close_start()
        .normal_sub(3, 0x0A)
        .close()
        .open(channel, false)
        .close_start()
        .normal_sub(4, 0x01)
        .close()
        .open(computer, false)
        .close_start()
        .normal_sub(5, 0x01)
        .close()
        .close() // System
        .open(event_data, false)
        .close_start()
        .open(data, true)
        .attr(name)
        .string_value("Info")
        .close_start()
        .normal_sub(6, 0x01)
        .close()
        .close() // EventData
        .close() // Event
        .eof()
        .0
}

/// A record body instantiating the standard template.
pub fn standard_record_body(template_offset: u32, record_id: u64) -> Vec<u8> {
    let written = EPOCH_TICKS + record_id * 10_000_000;
    BinXml::new()
        .fragment_header()
        .template_instance(0x0001, template_offset)
        .substitutions(&[
            (0x01, utf16le("TestProvider")),
            (0x06, 4625u16.to_le_bytes().to_vec()),
            (0x11, written.to_le_bytes().to_vec()),
            (0x0A, record_id.to_le_bytes().to_vec()),
            (0x01, utf16le("Security")),
            (0x01, utf16le("host.example.com")),
            (0x01, utf16le(&format!("record {record_id}"))),
        ])
        .eof()
        .0
}

fn file_header_block(chunk_count: usize, next_record_id: u64) -> Vec<u8> {
    let mut block = vec![0u8; FILE_HEADER_BLOCK];
    block[0..8].copy_from_slice(b"ElfFile\x00");
    block[8..16].copy_from_slice(&0u64.to_le_bytes());
    block[16..24].copy_from_slice(&(chunk_count.saturating_sub(1) as u64).to_le_bytes());
    block[24..32].copy_from_slice(&next_record_id.to_le_bytes());
    block[32..36].copy_from_slice(&128u32.to_le_bytes());
    block[36..38].copy_from_slice(&1u16.to_le_bytes());
    block[38..40].copy_from_slice(&3u16.to_le_bytes());
    block[40..42].copy_from_slice(&4096u16.to_le_bytes());
    block[42..44].copy_from_slice(&(chunk_count as u16).to_le_bytes());
    let crc = crc32fast::hash(&block[..120]);
    block[124..128].copy_from_slice(&crc.to_le_bytes());
    block
}

/// Build a clean file: `num_chunks` chunks of `records_per_chunk` records
/// each, record ids assigned contiguously from 1.
pub fn build_file(num_chunks: usize, records_per_chunk: usize) -> Vec<u8> {
    let total = (num_chunks * records_per_chunk) as u64;
    let mut out = file_header_block(num_chunks, total + 1);

    let mut next_id = 1u64;
    for _ in 0..num_chunks {
        let mut chunk = ChunkBuilder::new();
        let body = standard_template_body(&mut chunk);
        let template = chunk.add_template(SAMPLE_TEMPLATE_GUID, &body);
        for _ in 0..records_per_chunk {
            let record = standard_record_body(template, next_id);
            chunk.add_record(next_id, EPOCH_TICKS + next_id * 10_000_000, &record);
            next_id += 1;
        }
        out.extend_from_slice(&chunk.finish());
    }
    out
}

pub fn chunk_file_offset(chunk_index: usize) -> usize {
    FILE_HEADER_BLOCK + chunk_index * CHUNK_SIZE
}

/// Flip a byte of the chunk signature.
pub fn corrupt_chunk_magic(file: &mut [u8], chunk_index: usize) {
    file[chunk_file_offset(chunk_index)] ^= 0xFF;
}

/// Break the stored event-data checksum, leaving the data itself intact.
pub fn corrupt_data_checksum(file: &mut [u8], chunk_index: usize) {
    file[chunk_file_offset(chunk_index) + 52] ^= 0xFF;
}

/// Zero-fill the whole chunk slot.
pub fn zero_chunk(file: &mut [u8], chunk_index: usize) {
    let start = chunk_file_offset(chunk_index);
    file[start..start + CHUNK_SIZE].fill(0);
}
