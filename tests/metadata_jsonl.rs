mod common;

use std::fs;
use std::sync::Arc;

use binsift::dissect::DissectorRegistry;
use binsift::engine::ScanMode;
use binsift::extract::extract_descriptor;
use binsift::metadata::{MetadataBackendKind, RunSummary, build_sink};

use common::{file_source, insert_bytes, options, run_engine_on, sample_pdf};

#[test]
fn jsonl_sink_writes_descriptors_and_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.bin");
    let out = dir.path().join("run");

    let mut data = vec![0u8; 2048];
    insert_bytes(&mut data, 512, &sample_pdf(100));
    insert_bytes(&mut data, 1500, b"http://a.example/one");
    insert_bytes(&mut data, 1700, b"http://b.example/two");

    let source = file_source(&input, &data, 4096);
    let report = run_engine_on(
        source.clone(),
        Arc::new(DissectorRegistry::with_defaults()),
        options(ScanMode::Indexed, 1, 1024),
    );
    assert_eq!(report.descriptors.len(), 2);

    let sink = build_sink(MetadataBackendKind::Jsonl, "run-1", "0.0.0", "cafe", &input, &out)
        .expect("sink");
    for descriptor in &report.descriptors {
        let extracted = extract_descriptor(&source, descriptor, &out).expect("extract");
        // Grouped outputs get a newline after every region.
        let separators = if descriptor.is_grouped() {
            descriptor.source_regions.len() as u64
        } else {
            0
        };
        assert_eq!(extracted.size, descriptor.total_size + separators);
        sink.record_descriptor(descriptor, Some(&extracted)).expect("record");
    }
    sink.record_run_summary(&RunSummary {
        run_id: "run-1".to_string(),
        source_len: source.len(),
        format_handler: "Generic".to_string(),
        cancelled: false,
        descriptors: report.descriptors.len() as u64,
        stats: report.stats,
    })
    .expect("summary");
    sink.flush().expect("flush");

    let text = fs::read_to_string(out.join("metadata").join("descriptors.jsonl")).expect("read");
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["dissector"], "PDF");
    assert_eq!(records[0]["run_id"], "run-1");
    assert_eq!(records[0]["config_hash"], "cafe");
    assert_eq!(records[0]["suggested_name"], "PDF_000000000200.pdf");
    assert_eq!(records[0]["source_regions"][0]["start"], 512);
    assert_eq!(records[1]["dissector"], "URL");
    assert_eq!(records[1]["source_regions"].as_array().map(Vec::len), Some(2));
    assert_eq!(records[1]["extracted"]["path"], "strings/url_group.txt");

    let pdf = fs::read(out.join("documents").join("PDF_000000000200.pdf")).expect("pdf");
    assert_eq!(pdf, sample_pdf(100));

    let urls = fs::read_to_string(out.join("strings").join("url_group.txt")).expect("urls");
    assert_eq!(urls, "http://a.example/one\nhttp://b.example/two\n");

    let summary = fs::read_to_string(out.join("metadata").join("run_summary.jsonl")).expect("read");
    let summary: serde_json::Value = serde_json::from_str(summary.trim()).expect("json");
    assert_eq!(summary["descriptors"], 2);
    assert_eq!(summary["accepted"], 3);
    assert_eq!(summary["cancelled"], false);
}
