//! Shared test infrastructure for the integration tests.
//!
//! Builds synthetic inputs with artifacts planted at known offsets and runs
//! the carving engine over them.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use binsift::cache::ChunkedSource;
use binsift::dissect::DissectorRegistry;
use binsift::engine::{CarvingEngine, CarvingReport, EngineOptions, JobOutcome, ScanMode};
use binsift::evidence::{EvidenceSource, RawFileSource};

pub fn insert_bytes(target: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if end > target.len() {
        target.resize(end, 0u8);
    }
    target[offset..end].copy_from_slice(data);
}

/// A small PDF whose trailer section satisfies the structural checks.
pub fn sample_pdf(body_len: usize) -> Vec<u8> {
    let mut data = b"%PDF-1.7\n".to_vec();
    data.extend(std::iter::repeat_n(b'a', body_len));
    data.extend_from_slice(b"\nxref\n0 1\ntrailer\n<< >>\nstartxref\n9\n%%EOF");
    data
}

fn png_chunk(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

pub fn sample_png(idat_len: usize) -> Vec<u8> {
    let mut out = b"\x89PNG\r\n\x1a\n".to_vec();
    out.extend(png_chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0]));
    out.extend(png_chunk(b"IDAT", &vec![0x33; idat_len]));
    out.extend(png_chunk(b"IEND", &[]));
    out
}

/// PE32 image with headers in the first 0x200 bytes and a single section
/// that claims `raw_size` bytes at 0x200. Only `present` section bytes are
/// actually emitted.
pub fn sample_pe(raw_size: u32, present: usize) -> Vec<u8> {
    let mut img = vec![0u8; 0x200 + present];
    img[0..2].copy_from_slice(b"MZ");
    img[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    img[0x80..0x84].copy_from_slice(b"PE\0\0");
    img[0x84..0x86].copy_from_slice(&0x014cu16.to_le_bytes());
    img[0x86..0x88].copy_from_slice(&1u16.to_le_bytes());
    img[0x94..0x96].copy_from_slice(&0xE0u16.to_le_bytes());
    let opt = 0x98;
    img[opt..opt + 2].copy_from_slice(&0x10bu16.to_le_bytes());
    img[opt + 60..opt + 64].copy_from_slice(&0x200u32.to_le_bytes());
    let sec = opt + 0xE0;
    img[sec..sec + 5].copy_from_slice(b".text");
    img[sec + 16..sec + 20].copy_from_slice(&raw_size.to_le_bytes());
    img[sec + 20..sec + 24].copy_from_slice(&0x200u32.to_le_bytes());
    img
}

pub fn options(mode: ScanMode, workers: usize, window_size: u64) -> EngineOptions {
    EngineOptions {
        mode,
        workers,
        window_size,
        max_offset: None,
    }
}

pub fn run_engine(data: Vec<u8>, cache_size: usize, opts: EngineOptions) -> CarvingReport {
    let source = Arc::new(ChunkedSource::from_bytes(data, cache_size));
    run_engine_on(source, Arc::new(DissectorRegistry::with_defaults()), opts)
}

pub fn run_engine_on(
    source: Arc<ChunkedSource>,
    registry: Arc<DissectorRegistry>,
    opts: EngineOptions,
) -> CarvingReport {
    let engine = CarvingEngine::new(registry, opts).expect("engine");
    match engine.job(source).run().expect("run") {
        JobOutcome::Completed(report) => report,
        JobOutcome::Cancelled { .. } => panic!("job was cancelled"),
    }
}

pub fn file_source(path: &Path, data: &[u8], cache_size: usize) -> Arc<ChunkedSource> {
    fs::write(path, data).expect("write input");
    let evidence: Arc<dyn EvidenceSource> = Arc::new(RawFileSource::open(path).expect("evidence"));
    Arc::new(ChunkedSource::new(evidence, cache_size))
}
