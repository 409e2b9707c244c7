mod fixtures;

use fixtures::*;
use pretty_assertions::assert_eq;
use winevtx::{
    CancellationToken, Diagnostic, EvtxChunk, EvtxError, EvtxFileHeader, EvtxParser, OutputFormat,
    ParserSettings,
};

fn parse_xml(file: &[u8], threads: usize) -> winevtx::ParsedFile {
    EvtxParser::from_buffer(file)
        .with_configuration(ParserSettings::new().num_threads(threads))
        .parse()
        .unwrap()
}

#[test]
fn clean_small_file_single_threaded() {
    ensure_env_logger_initialized();
    let file = build_file(1, 10);
    let parsed = parse_xml(&file, 1);

    assert_eq!(parsed.total_records(), 10);
    assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);

    let ids: Vec<u64> = parsed.events().map(|e| e.record_id()).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<u64>>());

    for event in parsed.events() {
        assert!(
            event.xml.starts_with("<Event xmlns=\""),
            "unexpected xml prefix: {}",
            &event.xml[..event.xml.len().min(60)]
        );
        assert!(event.diagnostic.is_none());
    }
}

#[test]
fn record_count_matches_chunk_sum() {
    ensure_env_logger_initialized();
    let file = build_file(3, 7);
    let parsed = parse_xml(&file, 1);

    let sum: usize = parsed.chunks.iter().map(|c| c.records.len()).sum();
    assert_eq!(parsed.total_records(), sum);
    assert_eq!(sum, 21);
}

#[test]
fn record_ids_stay_in_the_declared_chunk_range() {
    ensure_env_logger_initialized();
    let file = build_file(3, 9);
    let parsed = parse_xml(&file, 1);

    for chunk in &parsed.chunks {
        let header = chunk.header.as_ref().expect("clean chunks keep headers");
        for record in &chunk.records {
            assert!(record.meta.event_record_id >= header.first_event_record_id);
            assert!(record.meta.event_record_id <= header.last_event_record_id);
        }
        // A clean chunk is also contiguous.
        for pair in chunk.records.windows(2) {
            assert_eq!(
                pair[1].meta.event_record_id,
                pair[0].meta.event_record_id + 1
            );
        }
    }
}

#[test]
fn thread_count_does_not_change_rendered_bytes() {
    ensure_env_logger_initialized();
    let file = build_file(4, 25);

    let baseline: Vec<String> = parse_xml(&file, 1)
        .events()
        .map(|e| e.xml.to_string())
        .collect();
    assert_eq!(baseline.len(), 100);

    for threads in [2usize, 4, 8] {
        let rendered: Vec<String> = parse_xml(&file, threads)
            .events()
            .map(|e| e.xml.to_string())
            .collect();
        assert_eq!(rendered, baseline, "{threads} workers diverged");
    }
}

#[test]
fn flat_iterator_is_strictly_increasing_on_a_clean_parse() {
    ensure_env_logger_initialized();
    let file = build_file(4, 11);
    let parsed = parse_xml(&file, 4);

    let ids: Vec<u64> = parsed.events().map(|e| e.record_id()).collect();
    for pair in ids.windows(2) {
        assert!(pair[1] > pair[0], "ids must be strictly increasing: {ids:?}");
    }
}

#[test]
fn bad_chunk_magic_is_recovered_headerless() {
    ensure_env_logger_initialized();
    let mut file = build_file(2, 10);
    corrupt_chunk_magic(&mut file, 0);

    let parsed = parse_xml(&file, 1);

    let phase3_ids: Vec<u64> = parsed
        .chunks
        .iter()
        .filter(|c| !c.recovered)
        .flat_map(|c| c.records.iter().map(|r| r.meta.event_record_id))
        .collect();
    let all_ids: Vec<u64> = parsed.events().map(|e| e.record_id()).collect();

    // Phase-3 output is a strict subset of the final result.
    assert_eq!(phase3_ids, (11..=20).collect::<Vec<u64>>());
    assert!(all_ids.len() > phase3_ids.len());
    assert_eq!(all_ids.len(), 20);

    assert!(parsed.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::ChunkSignatureInvalid { slot: 0, .. }
    )));

    let recovered: Vec<_> = parsed.chunks.iter().filter(|c| c.recovered).collect();
    assert_eq!(recovered.len(), 1);
    assert!(recovered[0].header.is_none());
    for record in &recovered[0].records {
        assert!(record.xml.starts_with("<Event"));
        for needle in [
            "<System>",
            "<EventID",
            "<Provider",
            "<TimeCreated",
            "<Channel>",
            "<Computer>",
        ] {
            assert!(
                record.xml.contains(needle),
                "recovered record {} lacks {needle}: {}",
                record.meta.event_record_id,
                record.xml
            );
        }
        assert!(matches!(
            record.diagnostic,
            Some(Diagnostic::PartialRecovery { .. })
        ));
    }
}

#[test]
fn checksum_failure_diverts_the_chunk_when_validation_is_on() {
    ensure_env_logger_initialized();
    let mut file = build_file(2, 5);
    corrupt_data_checksum(&mut file, 1);

    let parsed = EvtxParser::from_buffer(&file)
        .with_configuration(ParserSettings::new().num_threads(1).validate_checksums(true))
        .parse()
        .unwrap();

    let phase3_slots: Vec<usize> = parsed
        .chunks
        .iter()
        .filter(|c| !c.recovered)
        .map(|c| c.slot)
        .collect();
    assert_eq!(phase3_slots, vec![0], "the damaged chunk must skip phase 3");

    // The diagnostic names the slot offset in hex (4096 + 65536 = 0x11000).
    let rendered: Vec<String> = parsed.diagnostics.iter().map(|d| d.to_string()).collect();
    assert!(
        rendered.iter().any(|d| d.contains("0x11000")),
        "diagnostics: {rendered:?}"
    );
    assert!(parsed.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::ChunkChecksumFailed { slot: 1, .. }
    )));

    // The data itself is intact, so recovery brings the records back.
    let recovered_ids: Vec<u64> = parsed
        .chunks
        .iter()
        .filter(|c| c.recovered)
        .flat_map(|c| c.records.iter().map(|r| r.meta.event_record_id))
        .collect();
    assert_eq!(recovered_ids, (6..=10).collect::<Vec<u64>>());
}

#[test]
fn clean_file_passes_checksum_validation() {
    ensure_env_logger_initialized();
    let file = build_file(2, 6);
    let parsed = EvtxParser::from_buffer(&file)
        .with_configuration(ParserSettings::new().num_threads(1).validate_checksums(true))
        .parse()
        .unwrap();

    assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
    assert_eq!(parsed.chunks.len(), 2);
    assert!(parsed.chunks.iter().all(|c| !c.recovered));
    assert_eq!(parsed.total_records(), 12);
}

#[test]
fn zero_filled_tail_chunk_is_ignored() {
    ensure_env_logger_initialized();
    let mut file = build_file(3, 5);
    zero_chunk(&mut file, 2);

    let parsed = parse_xml(&file, 1);
    assert_eq!(parsed.chunks.len(), 2, "the zero block yields no chunk");
    assert_eq!(parsed.total_records(), 10);
    assert!(parsed.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::ChunkSignatureInvalid { slot: 2, .. }
    )));
}

#[test]
fn pre_cancelled_token_cancels_with_no_output() {
    ensure_env_logger_initialized();
    let file = build_file(1, 3);
    let token = CancellationToken::new();
    token.cancel();

    let result = EvtxParser::from_buffer(&file)
        .with_configuration(ParserSettings::new().cancellation(token))
        .parse();
    assert!(matches!(result, Err(EvtxError::Cancelled)));
}

#[test]
fn xml_and_json_modes_agree_on_event_population() {
    ensure_env_logger_initialized();
    let file = build_file(2, 8);

    let xml_parsed = parse_xml(&file, 1);
    let json_parsed = EvtxParser::from_buffer(&file)
        .with_configuration(
            ParserSettings::new()
                .num_threads(1)
                .output_format(OutputFormat::Json),
        )
        .parse()
        .unwrap();

    assert_eq!(xml_parsed.total_records(), json_parsed.total_records());

    for (xml_event, json_event) in xml_parsed.events().zip(json_parsed.events()) {
        assert_eq!(xml_event.record_id(), json_event.record_id());

        let value: serde_json::Value = serde_json::from_slice(json_event.json).unwrap();
        let name_is_event = value
            .as_object()
            .and_then(|o| o.get("#name"))
            .and_then(|n| n.as_str())
            == Some("Event");
        assert_eq!(xml_event.xml.contains("<Event"), name_is_event);
    }
}

#[test]
fn json_structure_follows_the_element_convention() {
    ensure_env_logger_initialized();
    let file = build_file(1, 1);
    let parsed = EvtxParser::from_buffer(&file)
        .with_configuration(
            ParserSettings::new()
                .num_threads(1)
                .output_format(OutputFormat::Json),
        )
        .parse()
        .unwrap();

    let event = parsed.events().next().unwrap();
    let value: serde_json::Value = serde_json::from_slice(event.json).unwrap();
    let root = value.as_object().unwrap();

    assert_eq!(root["#name"], "Event");
    assert_eq!(
        root["#attrs"]["xmlns"],
        "http://schemas.microsoft.com/win/2004/08/events/event"
    );

    let content = root["#content"].as_array().unwrap();
    let system = content
        .iter()
        .find(|c| c["#name"] == "System")
        .expect("System child present");
    let children = system["#content"].as_array().unwrap();

    let event_id = children
        .iter()
        .find(|c| c["#name"] == "EventID")
        .expect("EventID child present");
    // Numbers stay typed in JSON.
    assert_eq!(event_id["#content"], 4625);

    let record_id = children
        .iter()
        .find(|c| c["#name"] == "EventRecordID")
        .unwrap();
    assert_eq!(record_id["#content"], 1);
}

#[test]
fn timestamps_render_iso8601_with_trimmed_fraction() {
    ensure_env_logger_initialized();
    let file = build_file(1, 2);
    let parsed = parse_xml(&file, 1);

    let events: Vec<_> = parsed.events().collect();
    // Record ids map to seconds past the unix epoch in the fixture.
    assert!(events[0]
        .xml
        .contains("SystemTime=\"1970-01-01T00:00:01Z\""));
    assert!(events[1]
        .xml
        .contains("SystemTime=\"1970-01-01T00:00:02Z\""));
}

#[test]
fn event_data_substitutions_come_through() {
    ensure_env_logger_initialized();
    let file = build_file(1, 3);
    let parsed = parse_xml(&file, 1);

    for (i, event) in parsed.events().enumerate() {
        let expected = format!("<Data Name=\"Info\">record {}</Data>", i + 1);
        assert!(
            event.xml.contains(&expected),
            "missing {expected} in {}",
            event.xml
        );
        assert!(event.xml.contains("<Provider Name=\"TestProvider\"/>"));
        assert!(event.xml.contains("<Channel>Security</Channel>"));
        assert!(event.xml.contains("<Computer>host.example.com</Computer>"));
    }
}

#[test]
fn direct_framing_errors_are_typed() {
    ensure_env_logger_initialized();

    assert!(matches!(
        EvtxFileHeader::from_buf(&[0u8; 16]),
        Err(EvtxError::FileHeaderTooShort { have: 16 })
    ));

    let mut not_evtx = build_file(1, 1);
    not_evtx[0] = b'M';
    assert!(matches!(
        EvtxParser::from_buffer(&not_evtx).parse(),
        Err(EvtxError::InvalidFileSignature { .. })
    ));

    assert!(matches!(
        EvtxChunk::new(&[0u8; 100]),
        Err(EvtxError::ChunkHeaderTooShort { have: 100 })
    ));

    let file = build_file(1, 2);
    let chunk_slice = &file[chunk_file_offset(0)..chunk_file_offset(0) + CHUNK_SIZE];
    let chunk = EvtxChunk::new(chunk_slice).unwrap();
    assert_eq!(chunk.header.first_event_record_id, 1);
    assert_eq!(chunk.header.last_event_record_id, 2);
}
