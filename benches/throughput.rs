use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use binsift::cache::ChunkedSource;
use binsift::config;
use binsift::engine::{CarvingEngine, EngineOptions, JobOutcome, ScanMode};
use binsift::evidence::{EvidenceSource, RawFileSource};
use binsift::util;

fn minimal_pdf() -> Vec<u8> {
    let mut pdf = b"%PDF-1.4\n".to_vec();
    pdf.extend(std::iter::repeat_n(b'x', 200));
    pdf.extend_from_slice(b"\nxref\ntrailer\nstartxref\n9\n%%EOF");
    pdf
}

fn run_engine(input_path: &std::path::Path, mode: ScanMode, workers: usize) -> u64 {
    let loaded = config::load_config(None).expect("config");
    let cfg = loaded.config;

    let evidence = RawFileSource::open(input_path).expect("evidence");
    let evidence: Arc<dyn EvidenceSource> = Arc::new(evidence);
    let source = Arc::new(ChunkedSource::new(evidence, cfg.cache_size()));

    let registry = Arc::new(util::build_dissector_registry(&cfg).expect("registry"));
    let engine = CarvingEngine::new(
        registry,
        EngineOptions {
            mode,
            workers,
            window_size: cfg.window_size(),
            max_offset: None,
        },
    )
    .expect("engine");

    match engine.job(source).run().expect("run") {
        JobOutcome::Completed(report) => report.stats.accepted,
        JobOutcome::Cancelled { .. } => 0,
    }
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("carving");
    for size in [8 * 1024 * 1024usize, 32 * 1024 * 1024usize] {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let input_path = temp_dir.path().join("image.bin");
        let file = File::create(&input_path).expect("create");
        file.set_len(size as u64).expect("set len");

        group.bench_with_input(BenchmarkId::new("indexed_zeroes", size), &size, |b, _| {
            b.iter(|| run_engine(&input_path, ScanMode::Indexed, 2));
        });
    }

    let temp_dir = tempfile::tempdir().expect("tempdir");
    let input_path = temp_dir.path().join("dense.bin");
    let mut file = File::create(&input_path).expect("create");
    let pdf = minimal_pdf();
    let padding = vec![0u8; 64];
    for i in 0..500 {
        file.write_all(&pdf).expect("write");
        file.write_all(&padding).expect("write");
        writeln!(file, "http://host{i}.example/page").expect("write");
    }
    file.flush().expect("flush");

    group.bench_function("pdf_url_dense", |b| {
        b.iter(|| run_engine(&input_path, ScanMode::Indexed, 2));
    });
    group.bench_function("pdf_url_dense_exhaustive", |b| {
        b.iter(|| run_engine(&input_path, ScanMode::Exhaustive, 2));
    });

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
