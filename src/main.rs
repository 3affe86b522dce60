use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

use binsift::{
    cache::{ChunkedSource, MIN_CACHE_SIZE},
    cli,
    config,
    engine::{CarvingEngine, EngineOptions, JobOutcome},
    evidence,
    extract,
    format::{FormatRegistry, PropertyPanel},
    logging,
    metadata::{self, RunSummary},
    util,
};

/// Leading bytes handed to format handlers.
const HEAD_LEN: usize = 4096;

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.log_json);

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(kib) = cli_opts.cache_kib {
        cfg.cache_size_kib = kib;
    }
    if let Some(mib) = cli_opts.window_mib {
        cfg.window_size_mib = mib;
    }
    if let Some(mode) = cli_opts.mode {
        cfg.scan_mode = util::mode_from_cli(mode);
    }
    let unknown = util::filter_dissectors(&mut cfg, cli_opts.types.as_deref());
    for name in unknown {
        warn!("unknown dissector in --types: {name}");
    }
    if cli_opts.types.is_some() && cfg.dissectors.is_empty() {
        warn!("no dissectors enabled after applying --types filter");
    }

    let run_output_dir = cli_opts.output.join(&cfg.run_id);
    util::ensure_output_dir(&run_output_dir)?;
    let tool_version = env!("CARGO_PKG_VERSION");

    info!(
        "starting run_id={} input={} output={} workers={} cache_kib={} mode={:?}",
        cfg.run_id,
        cli_opts.input.display(),
        run_output_dir.display(),
        cli_opts.workers,
        cfg.cache_size_kib,
        cfg.scan_mode
    );

    let evidence_source: Arc<dyn evidence::EvidenceSource> =
        Arc::from(evidence::open_source(&cli_opts.input)?);
    let source = Arc::new(ChunkedSource::new(
        evidence_source,
        cfg.cache_size().max(MIN_CACHE_SIZE),
    ));

    let formats = FormatRegistry::from_config(&cfg.handlers)?;
    let extension = cli_opts
        .input
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let head = source.get(0, HEAD_LEN, false)?;
    let handler = formats.resolve(&head, &extension);
    info!("format handler: {}", handler.name());
    match formats.open_session(handler, &source) {
        Ok(session) => {
            let mut panel = PropertyPanel::default();
            session.populate_window(&mut panel);
            for (name, value) in &panel.properties {
                info!("  {name}: {value}");
            }
            for (name, zone) in &panel.zones {
                info!("  zone {name} {zone}");
            }
        }
        Err(err) => warn!("format handler {} could not open source: {err}", handler.name()),
    }

    let registry = Arc::new(util::build_dissector_registry(&cfg)?);
    let engine = CarvingEngine::new(
        registry,
        EngineOptions {
            mode: cfg.scan_mode,
            workers: cli_opts.workers.max(1),
            window_size: cfg.window_size(),
            max_offset: cli_opts.max_offset,
        },
    )?;

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let flag = cancel_flag.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let mut job = engine.job(source.clone()).with_cancel_flag(cancel_flag);
    let outcome = job.run()?;

    let meta_sink = metadata::build_sink(
        util::backend_from_cli(cli_opts.metadata_backend),
        &cfg.run_id,
        tool_version,
        &loaded.config_hash,
        &cli_opts.input,
        &run_output_dir,
    )?;

    let (descriptor_count, cancelled) = match &outcome {
        JobOutcome::Completed(report) => {
            for descriptor in &report.descriptors {
                let extracted = if cli_opts.extract {
                    match extract::extract_descriptor(&source, descriptor, &run_output_dir) {
                        Ok(file) => Some(file),
                        Err(err) => {
                            warn!("extraction of {} failed: {err}", descriptor.suggested_name);
                            None
                        }
                    }
                } else {
                    None
                };
                meta_sink.record_descriptor(descriptor, extracted.as_ref())?;
            }
            (report.descriptors.len() as u64, false)
        }
        JobOutcome::Cancelled { partial, .. } => {
            warn!(
                "run cancelled; {} unresolved findings discarded",
                partial.len()
            );
            (0, true)
        }
    };

    meta_sink.record_run_summary(&RunSummary {
        run_id: cfg.run_id.clone(),
        source_len: source.len(),
        format_handler: handler.name().to_string(),
        cancelled,
        descriptors: descriptor_count,
        stats: *outcome.stats(),
    })?;
    meta_sink.flush()?;

    info!("binsift run finished");
    Ok(())
}
